//! Persisting extracted rows per campaign, and the matching step after it.
//!
//! [`ResultSink::replace`] is delete-then-insert as one logical unit: after a
//! successful call exactly the new rows are stored for the campaign. A
//! failure says which stage broke and whether stored rows may now be mixed.
//!
//! Runs for the same campaign must not overlap; callers serialise them.

use crate::error::{PetitionError, StorageStage};
use crate::output::write_atomic;
use crate::provider::transport::{Auth, HttpTransport, VendorRequest};
use crate::provider::truncate_detail;
use crate::record::AnnotatedRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// What a successful replace did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReport {
    pub campaign: String,
    /// Rows removed (the previous set).
    pub deleted: usize,
    pub inserted: usize,
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Replace every stored row of `campaign_key` with `records`.
    async fn replace(
        &self,
        records: &[AnnotatedRecord],
        campaign_key: &str,
    ) -> Result<SinkReport, PetitionError>;
}

/// Campaign keys name storage locations: non-empty, no path separators, no `..`.
pub fn validate_campaign_key(key: &str) -> Result<(), PetitionError> {
    let bad = key.trim().is_empty()
        || key.contains(['/', '\\', '\0'])
        || key.contains("..");
    if bad {
        return Err(PetitionError::InvalidCampaignKey(key.to_string()));
    }
    Ok(())
}

// ── MemorySink ───────────────────────────────────────────────────────────────

/// In-process sink. One lock covers delete and insert.
#[derive(Debug, Default)]
pub struct MemorySink {
    campaigns: Mutex<HashMap<String, Vec<AnnotatedRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows currently stored for a campaign.
    pub async fn rows(&self, campaign_key: &str) -> Vec<AnnotatedRecord> {
        self.campaigns
            .lock()
            .await
            .get(campaign_key)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn replace(
        &self,
        records: &[AnnotatedRecord],
        campaign_key: &str,
    ) -> Result<SinkReport, PetitionError> {
        validate_campaign_key(campaign_key)?;
        let mut campaigns = self.campaigns.lock().await;
        let deleted = campaigns
            .insert(campaign_key.to_string(), records.to_vec())
            .map(|old| old.len())
            .unwrap_or(0);
        Ok(SinkReport {
            campaign: campaign_key.to_string(),
            deleted,
            inserted: records.len(),
        })
    }
}

// ── JsonFileSink ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct CampaignDocument {
    campaign: String,
    records: Vec<AnnotatedRecord>,
}

/// One `<campaign>.json` per campaign under a directory.
///
/// The new document is written to a temp file beside the old one and renamed
/// over it, so a crash leaves either the complete old set or the complete new
/// set.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn campaign_path(&self, campaign_key: &str) -> Result<PathBuf, PetitionError> {
        validate_campaign_key(campaign_key)?;
        Ok(self.dir.join(format!("{campaign_key}.json")))
    }

    /// Rows currently stored for a campaign; empty when none were ever stored.
    pub async fn load(&self, campaign_key: &str) -> Result<Vec<AnnotatedRecord>, PetitionError> {
        let path = self.campaign_path(campaign_key)?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PetitionError::Internal(format!(
                    "reading {}: {e}",
                    path.display()
                )))
            }
        };
        let doc: CampaignDocument = serde_json::from_str(&text).map_err(|e| {
            PetitionError::Internal(format!("{} is not a campaign document: {e}", path.display()))
        })?;
        Ok(doc.records)
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn replace(
        &self,
        records: &[AnnotatedRecord],
        campaign_key: &str,
    ) -> Result<SinkReport, PetitionError> {
        let path = self.campaign_path(campaign_key)?;

        let deleted = match self.load(campaign_key).await {
            Ok(old) => old.len(),
            Err(e) => {
                warn!("Replacing unreadable campaign file {}: {}", path.display(), e);
                0
            }
        };

        let doc = CampaignDocument {
            campaign: campaign_key.to_string(),
            records: records.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| PetitionError::Storage {
            campaign: campaign_key.to_string(),
            stage: StorageStage::Insert,
            detail: e.to_string(),
            possibly_inconsistent: false,
        })?;

        // Rename is atomic, so a failure here leaves the previous set intact.
        write_atomic(&path, bytes)
            .await
            .map_err(|e| PetitionError::Storage {
                campaign: campaign_key.to_string(),
                stage: StorageStage::Commit,
                detail: e.to_string(),
                possibly_inconsistent: false,
            })?;

        info!(
            "Campaign '{}': replaced {} row(s) with {} → {}",
            campaign_key,
            deleted,
            records.len(),
            path.display()
        );
        Ok(SinkReport {
            campaign: campaign_key.to_string(),
            deleted,
            inserted: records.len(),
        })
    }
}

// ── Matching ─────────────────────────────────────────────────────────────────

/// The opaque voter-roll matching step, invoked by name after a replace.
#[async_trait]
pub trait MatchingProcedure: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, campaign_key: &str) -> Result<(), PetitionError>;
}

/// Calls `POST {base_url}/rpc/{name}` with `{"campaign_id_input": <key>}`.
pub struct RpcMatchingProcedure {
    base_url: String,
    name: String,
    api_key: Zeroizing<String>,
    transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for RpcMatchingProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcMatchingProcedure")
            .field("base_url", &self.base_url)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl RpcMatchingProcedure {
    /// Default procedure name.
    pub const DEFAULT_NAME: &'static str = "insert_top_matches";

    pub fn new(
        base_url: impl Into<String>,
        name: impl Into<String>,
        api_key: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            name: name.into(),
            api_key: Zeroizing::new(api_key.into()),
            transport,
        }
    }

    fn url(&self) -> String {
        format!("{}/rpc/{}", self.base_url.trim_end_matches('/'), self.name)
    }
}

#[async_trait]
impl MatchingProcedure for RpcMatchingProcedure {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, campaign_key: &str) -> Result<(), PetitionError> {
        let request = VendorRequest::new(
            self.url(),
            Auth::Bearer(self.api_key.clone()),
            json!({ "campaign_id_input": campaign_key }),
        )
        .with_secret_header("apikey", self.api_key.clone());

        let failed = |detail: String| PetitionError::MatchingFailed {
            procedure: self.name.clone(),
            detail,
        };

        let reply = self
            .transport
            .post_json(&request)
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !(200..300).contains(&reply.status) {
            return Err(failed(format!(
                "HTTP {}: {}",
                reply.status,
                truncate_detail(&reply.body)
            )));
        }
        debug!("Matching '{}' done for campaign '{}'", self.name, campaign_key);
        Ok(())
    }
}
