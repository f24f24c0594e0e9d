//! End-to-end petition job: files in, rows persisted, matching kicked off.
//!
//! [`PetitionJob::run`] wires the components together in a fixed order so
//! that every fatal check (crop config, credential, campaign key) happens
//! before the first vendor call is made.

use crate::batch::BatchOrchestrator;
use crate::config::PipelineConfig;
use crate::credentials::{CredentialCipher, CredentialStore, EncryptedSecret, ProviderCredential};
use crate::error::PetitionError;
use crate::output::{JobOutput, JobStats, MatchingOutcome};
use crate::pipeline::encode::{encode_image, EncodedImage};
use crate::pipeline::input::SourceFile;
use crate::preprocess::{save_images, ImagePreprocessor};
use crate::progress::BatchProgressCallback;
use crate::provider::transport::HttpTransport;
use crate::provider::{ProviderGateway, ProviderKind};
use crate::sink::{validate_campaign_key, MatchingProcedure, ResultSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Where the vendor key comes from.
pub enum CredentialSource {
    /// Encrypted in a store, decrypted just before the batch runs.
    Stored {
        store: Arc<dyn CredentialStore>,
        cipher: Arc<CredentialCipher>,
        owner_id: String,
    },
    /// Supplied directly (e.g. from the environment).
    Plain(Zeroizing<String>),
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::Stored { owner_id, .. } => {
                f.debug_struct("Stored").field("owner_id", owner_id).finish_non_exhaustive()
            }
            CredentialSource::Plain(_) => f.write_str("Plain(<redacted>)"),
        }
    }
}

/// Per-run parameters.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub provider: ProviderKind,
    /// Persist under this campaign. `None` skips the sink and matching.
    pub campaign_key: Option<String>,
}

/// A configured pipeline, reusable across runs.
pub struct PetitionJob {
    config: PipelineConfig,
    transport: Arc<dyn HttpTransport>,
    credentials: CredentialSource,
    sink: Option<Arc<dyn ResultSink>>,
    matching: Option<Arc<dyn MatchingProcedure>>,
    save_images_dir: Option<PathBuf>,
}

impl PetitionJob {
    pub fn new(
        config: PipelineConfig,
        transport: Arc<dyn HttpTransport>,
        credentials: CredentialSource,
    ) -> Self {
        Self {
            config,
            transport,
            credentials,
            sink: None,
            matching: None,
            save_images_dir: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_matching(mut self, matching: Arc<dyn MatchingProcedure>) -> Self {
        self.matching = Some(matching);
        self
    }

    /// Also write every normalised page as PNG under `dir`.
    pub fn save_images_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_images_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole pipeline over `sources`.
    ///
    /// # Errors
    /// Fatal only: missing crop config, credential lookup/decrypt, invalid
    /// campaign key, pdfium binding, exhausted vendor retries, storage.
    /// Pages that fail at the vendor are reported in
    /// [`JobOutput::images`]; a matching failure in [`JobOutput::matching`].
    pub async fn run(
        &self,
        sources: &[SourceFile],
        request: &JobRequest,
        progress: &dyn BatchProgressCallback,
    ) -> Result<JobOutput, PetitionError> {
        let total_start = Instant::now();
        info!(
            "Starting job: {} source(s), provider {}",
            sources.len(),
            request.provider
        );

        // ── Step 1: Validate before any work ─────────────────────────────────
        let preprocessor = ImagePreprocessor::new(&self.config)?;
        if let Some(key) = &request.campaign_key {
            validate_campaign_key(key)?;
        }

        // ── Step 2: Look up the credential (still encrypted) ─────────────────
        let encrypted: Option<EncryptedSecret> = match &self.credentials {
            CredentialSource::Stored {
                store, owner_id, ..
            } => Some(store.lookup(owner_id, request.provider).await?),
            CredentialSource::Plain(_) => None,
        };

        // ── Step 3: Preprocess and encode ────────────────────────────────────
        let preprocess_start = Instant::now();
        let normalized = preprocessor.preprocess_all(sources).await?;
        if let Some(dir) = &self.save_images_dir {
            let written = save_images(&normalized, dir).await?;
            info!("Saved {} page image(s) to {}", written.len(), dir.display());
        }
        let encoded = normalized
            .iter()
            .map(encode_image)
            .collect::<Result<Vec<EncodedImage>, _>>()?;
        let normalized_images = normalized.len();
        drop(normalized);
        let preprocess_duration_ms = preprocess_start.elapsed().as_millis() as u64;

        // ── Step 4: Decrypt just in time and extract ─────────────────────────
        let extraction_start = Instant::now();
        let batch = {
            let credential = self.decrypt(encrypted.as_ref())?;
            let gateway = Arc::new(ProviderGateway::from_config(
                &self.config,
                request.provider,
                Arc::clone(&self.transport),
            ));
            let orchestrator = BatchOrchestrator::new(gateway, self.config.batch_size)?;
            orchestrator
                .run(&encoded, self.config.prompt_text(), &credential, progress)
                .await?
        };
        let extraction_duration_ms = extraction_start.elapsed().as_millis() as u64;

        // ── Step 5: Persist ──────────────────────────────────────────────────
        let persisted = match (&self.sink, &request.campaign_key) {
            (Some(sink), Some(key)) => {
                let report = sink.replace(&batch.records, key).await?;
                debug!("Sink report: {:?}", report);
                true
            }
            _ => false,
        };

        // ── Step 6: Matching ─────────────────────────────────────────────────
        let matching = match (&self.matching, &request.campaign_key) {
            (Some(procedure), Some(key)) if persisted => match procedure.invoke(key).await {
                Ok(()) => MatchingOutcome::Completed {
                    procedure: procedure.name().to_string(),
                },
                Err(e) => {
                    warn!("Rows persisted but matching failed: {}", e);
                    MatchingOutcome::Failed {
                        procedure: procedure.name().to_string(),
                        detail: e.to_string(),
                    }
                }
            },
            _ => MatchingOutcome::Skipped,
        };

        let stats = JobStats {
            source_files: sources.len(),
            normalized_images,
            total_records: batch.records.len(),
            failed_images: batch.failed_images(),
            empty_images: batch.empty_images(),
            preprocess_duration_ms,
            extraction_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        info!(
            "Job complete: {} record(s) from {} image(s), {} failed, {}ms total",
            stats.total_records, stats.normalized_images, stats.failed_images, stats.total_duration_ms
        );

        Ok(JobOutput {
            records: batch.records,
            images: batch.images,
            stats,
            matching,
        })
    }

    fn decrypt(&self, encrypted: Option<&EncryptedSecret>) -> Result<ProviderCredential, PetitionError> {
        match (&self.credentials, encrypted) {
            (CredentialSource::Stored { cipher, .. }, Some(secret)) => cipher.decrypt(secret),
            (CredentialSource::Plain(key), _) => Ok(ProviderCredential::new(key.as_str())),
            (CredentialSource::Stored { .. }, None) => Err(PetitionError::Internal(
                "stored credential was not looked up".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CropConfig;
    use crate::credentials::MemoryCredentialStore;
    use crate::progress::NoopProgressCallback;
    use crate::provider::transport::{HttpReply, TransportError, VendorRequest};
    use async_trait::async_trait;

    struct PanicTransport;

    #[async_trait]
    impl HttpTransport for PanicTransport {
        async fn post_json(&self, _request: &VendorRequest) -> Result<HttpReply, TransportError> {
            panic!("no vendor call expected");
        }
    }

    fn job(config: PipelineConfig, credentials: CredentialSource) -> PetitionJob {
        PetitionJob::new(config, Arc::new(PanicTransport), credentials)
    }

    fn request() -> JobRequest {
        JobRequest {
            provider: ProviderKind::OpenAi,
            campaign_key: Some("c1".into()),
        }
    }

    #[tokio::test]
    async fn missing_crop_fails_before_credential_lookup() {
        let store = Arc::new(MemoryCredentialStore::new());
        let j = job(
            PipelineConfig::default(),
            CredentialSource::Stored {
                store,
                cipher: Arc::new(CredentialCipher::generate()),
                owner_id: "nobody".into(),
            },
        );
        let err = j.run(&[], &request(), &NoopProgressCallback).await.unwrap_err();
        assert!(matches!(err, PetitionError::MissingCropConfig));
    }

    #[tokio::test]
    async fn missing_credential_is_fatal() {
        let config = PipelineConfig::builder()
            .crop(CropConfig::full_page())
            .build()
            .unwrap();
        let j = job(
            config,
            CredentialSource::Stored {
                store: Arc::new(MemoryCredentialStore::new()),
                cipher: Arc::new(CredentialCipher::generate()),
                owner_id: "u".into(),
            },
        );
        let err = j.run(&[], &request(), &NoopProgressCallback).await.unwrap_err();
        assert!(matches!(err, PetitionError::CredentialNotFound { .. }));
    }

    #[tokio::test]
    async fn bad_campaign_key_is_fatal() {
        let config = PipelineConfig::builder()
            .crop(CropConfig::full_page())
            .build()
            .unwrap();
        let j = job(config, CredentialSource::Plain(Zeroizing::new("k".into())));
        let req = JobRequest {
            provider: ProviderKind::Gemini,
            campaign_key: Some("../x".into()),
        };
        let err = j.run(&[], &req, &NoopProgressCallback).await.unwrap_err();
        assert!(matches!(err, PetitionError::InvalidCampaignKey(_)));
    }

    #[tokio::test]
    async fn no_sources_is_an_empty_success() {
        let config = PipelineConfig::builder()
            .crop(CropConfig::full_page())
            .build()
            .unwrap();
        let j = job(config, CredentialSource::Plain(Zeroizing::new("k".into())));
        let out = j.run(&[], &request(), &NoopProgressCallback).await.unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.stats.source_files, 0);
        assert_eq!(out.matching, MatchingOutcome::Skipped);
    }

    #[test]
    fn credential_source_debug_is_redacted() {
        let s = CredentialSource::Plain(Zeroizing::new("sk-secret".into()));
        assert!(!format!("{s:?}").contains("sk-secret"));
    }
}
