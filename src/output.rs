//! Result types returned by the orchestrator and the job, plus the atomic
//! file write shared by every on-disk store.

use crate::error::PageError;
use crate::record::AnnotatedRecord;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// What happened to one image in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageOutcome {
    /// 1-based position of the image in the whole input.
    pub page_number: usize,
    pub filename: String,
    pub record_count: usize,
    /// Present when the vendor call failed and the image was degraded to
    /// an empty record set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
}

/// Result of [`crate::batch::BatchOrchestrator::run`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutput {
    /// Annotated rows in input order, then vendor row order.
    pub records: Vec<AnnotatedRecord>,
    /// One entry per input image, in input order.
    pub images: Vec<ImageOutcome>,
}

impl BatchOutput {
    pub fn failed_images(&self) -> usize {
        self.images.iter().filter(|i| i.error.is_some()).count()
    }

    pub fn empty_images(&self) -> usize {
        self.images.iter().filter(|i| i.record_count == 0).count()
    }
}

/// Whether the post-persist matching procedure ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchingOutcome {
    /// No procedure configured, or nothing was persisted.
    Skipped,
    Completed { procedure: String },
    Failed { procedure: String, detail: String },
}

/// Timing and count summary of one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub source_files: usize,
    pub normalized_images: usize,
    pub total_records: usize,
    /// Images whose vendor call failed (degraded to empty).
    pub failed_images: usize,
    /// Images that produced zero rows, failed or not.
    pub empty_images: usize,
    pub preprocess_duration_ms: u64,
    pub extraction_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Full result of [`crate::job::PetitionJob::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    pub records: Vec<AnnotatedRecord>,
    pub images: Vec<ImageOutcome>,
    pub stats: JobStats,
    pub matching: MatchingOutcome,
}

/// Write `bytes` to `path` via a sibling temp file and rename.
///
/// Readers see either the old file or the new one, never a partial write.
pub(crate) async fn write_atomic(path: &Path, bytes: Vec<u8>) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("write task panicked: {e}")))?
}
