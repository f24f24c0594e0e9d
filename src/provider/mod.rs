//! Multi-vendor OCR gateway.
//!
//! ## Why one adapter per vendor?
//!
//! OpenAI, Mistral and Gemini all accept "prompt + image, give me text", but
//! every one of them spells the request differently, nests the answer at a
//! different JSON path, and behaves differently under load. A
//! [`VendorAdapter`] captures exactly those differences (request shape, text
//! location, output parsing); everything else (status mapping, retry, parse
//! downgrade, logging) lives once in [`ProviderGateway`].
//!
//! The adapter is picked once when the gateway is built, so the batch
//! orchestrator never branches on the vendor.
//!
//! ## Failure contract
//!
//! | Vendor answer | Result |
//! |---|---|
//! | 2xx, parseable array | `Ok(records)` |
//! | 2xx, anything else | `Ok(vec![])` + `warn!` |
//! | 401 | [`PetitionError::AuthFailed`] |
//! | 429 | [`PetitionError::RateLimited`] (retried per [`RetryPolicy`]) |
//! | 400 | [`PetitionError::BadRequest`] |
//! | other / transport | [`PetitionError::ProviderFailed`] |

pub mod gemini;
pub mod mistral;
pub mod openai;
pub mod parse;
pub mod retry;
pub mod transport;

use crate::config::{PipelineConfig, ProviderSettings};
use crate::credentials::ProviderCredential;
use crate::error::PetitionError;
use crate::pipeline::encode::EncodedImage;
use crate::record::ExtractionRecord;
use parse::ParseError;
use retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use transport::{HttpReply, HttpTransport, VendorRequest};

/// Maximum number of vendor-body characters carried in an error message.
const MAX_ERROR_DETAIL_CHARS: usize = 200;

// ── ProviderKind ─────────────────────────────────────────────────────────────

/// The supported OCR vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Mistral,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::OpenAi, ProviderKind::Mistral, ProviderKind::Gemini];

    /// Lower-case identifier used in config, storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// The environment-variable style tag older deployments stored keys under.
    pub fn legacy_tag(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Mistral => "MISTRAL_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = PetitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ProviderKind::ALL
            .into_iter()
            .find(|k| s.eq_ignore_ascii_case(k.as_str()) || s.eq_ignore_ascii_case(k.legacy_tag()))
            .ok_or_else(|| {
                PetitionError::InvalidConfig(format!(
                    "unknown provider '{s}' (expected openai, mistral or gemini)"
                ))
            })
    }
}

// ── VendorAdapter ────────────────────────────────────────────────────────────

/// What differs between vendors.
pub trait VendorAdapter: Send + Sync {
    /// Build the wire request for one image.
    fn build_request(
        &self,
        image: &EncodedImage,
        prompt: &str,
        credential: &ProviderCredential,
    ) -> VendorRequest;

    /// Pull the model's answer text out of a successful response envelope.
    fn extract_text(&self, body: &Value) -> Option<String>;

    /// Turn the answer text into a JSON array.
    fn parse_records(&self, text: &str) -> Result<Vec<Value>, ParseError> {
        parse::parse_simple(text)
    }
}

/// The adapter for a vendor, configured from its settings.
pub fn adapter_for(kind: ProviderKind, settings: &ProviderSettings) -> Box<dyn VendorAdapter> {
    match kind {
        ProviderKind::OpenAi => Box::new(openai::OpenAiAdapter::new(settings)),
        ProviderKind::Mistral => Box::new(mistral::MistralAdapter::new(settings)),
        ProviderKind::Gemini => Box::new(gemini::GeminiAdapter::new(settings)),
    }
}

// ── ProviderGateway ──────────────────────────────────────────────────────────

/// One vendor, one transport, one retry policy.
pub struct ProviderGateway {
    kind: ProviderKind,
    settings: ProviderSettings,
    adapter: Box<dyn VendorAdapter>,
    transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for ProviderGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderGateway")
            .field("kind", &self.kind)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ProviderGateway {
    pub fn new(
        kind: ProviderKind,
        settings: ProviderSettings,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let adapter = adapter_for(kind, &settings);
        debug!(
            "{}: model {}, {} attempt(s), up to {}ms backoff per image",
            kind,
            settings.model,
            settings.retry.max_attempts,
            settings.retry.total_backoff().as_millis()
        );
        Self {
            kind,
            settings,
            adapter,
            transport,
        }
    }

    /// Gateway for `kind` using the settings held in `config`.
    pub fn from_config(
        config: &PipelineConfig,
        kind: ProviderKind,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self::new(kind, config.provider(kind).clone(), transport)
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.settings.retry
    }

    /// Dispatch stagger inside one chunk, if any.
    pub fn pacing(&self) -> Option<Duration> {
        self.settings.pacing
    }

    /// Extract signer rows from one encoded image.
    ///
    /// Never returns `Ok` with anything but a (possibly empty) record list;
    /// model output that cannot be read becomes `Ok(vec![])`.
    pub async fn extract(
        &self,
        image: &EncodedImage,
        prompt: &str,
        credential: &ProviderCredential,
    ) -> Result<Vec<ExtractionRecord>, PetitionError> {
        let request = self.adapter.build_request(image, prompt, credential);

        let reply = retry::execute(&self.settings.retry, self.kind, |attempt| {
            let request = &request;
            async move {
                debug!(
                    "{}: sending '{}' (attempt {})",
                    self.kind, image.name, attempt
                );
                let reply = self.transport.post_json(request).await.map_err(|e| {
                    PetitionError::ProviderFailed {
                        provider: self.kind,
                        status: None,
                        detail: e.0,
                    }
                })?;
                classify_status(self.kind, reply)
            }
        })
        .await?;

        Ok(self.records_from_body(&image.name, &reply.body))
    }

    fn records_from_body(&self, image_name: &str, body: &str) -> Vec<ExtractionRecord> {
        let envelope: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                warn!("{}: '{}' response is not JSON: {}", self.kind, image_name, e);
                return Vec::new();
            }
        };

        let Some(text) = self.adapter.extract_text(&envelope) else {
            warn!(
                "{}: '{}' response has no answer text: {}",
                self.kind,
                image_name,
                truncate_detail(body)
            );
            return Vec::new();
        };

        match self.adapter.parse_records(&text) {
            Ok(items) => {
                let records: Vec<_> = items.iter().filter_map(ExtractionRecord::from_value).collect();
                debug!(
                    "{}: '{}' → {} rows ({} array items)",
                    self.kind,
                    image_name,
                    records.len(),
                    items.len()
                );
                records
            }
            Err(e) => {
                warn!(
                    "{}: '{}' answer could not be parsed ({}); treating as empty",
                    self.kind, image_name, e
                );
                Vec::new()
            }
        }
    }
}

/// Map a raw reply to success or the typed error for its status.
pub fn classify_status(kind: ProviderKind, reply: HttpReply) -> Result<HttpReply, PetitionError> {
    match reply.status {
        200..=299 => Ok(reply),
        401 => Err(PetitionError::AuthFailed {
            provider: kind,
            detail: truncate_detail(&reply.body),
        }),
        429 => Err(PetitionError::RateLimited { provider: kind }),
        400 => Err(PetitionError::BadRequest {
            provider: kind,
            detail: truncate_detail(&reply.body),
        }),
        status => Err(PetitionError::ProviderFailed {
            provider: kind,
            status: Some(status),
            detail: truncate_detail(&reply.body),
        }),
    }
}

/// At most [`MAX_ERROR_DETAIL_CHARS`] characters of a vendor body.
pub fn truncate_detail(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_DETAIL_CHARS) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}
