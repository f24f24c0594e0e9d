//! Progress-callback trait for chunk-level batch events.
//!
//! Pass any [`BatchProgressCallback`] to
//! [`crate::batch::BatchOrchestrator::run`] to receive events as each chunk
//! of images completes.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a channel, a job-status row, or a terminal progress bar
//! without the library knowing how the host application communicates.
//!
//! # Example
//!
//! A plain closure `(fraction, chunk, total_chunks)` is a callback:
//!
//! ```rust
//! use petition_ocr::BatchProgressCallback;
//!
//! let report = |fraction: f64, chunk: usize, total: usize| {
//!     eprintln!("chunk {chunk}/{total}: {:.0}%", fraction * 100.0);
//! };
//! report.on_progress(0.5, 1, 2);
//! ```

use serde::{Deserialize, Serialize};

/// Called by the orchestrator at batch and chunk boundaries.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Calls are made from the task driving the batch,
/// never concurrently.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first chunk is dispatched.
    fn on_batch_start(&self, total_images: usize, total_chunks: usize) {
        let _ = (total_images, total_chunks);
    }

    /// Called after every chunk has fully resolved.
    ///
    /// # Arguments
    /// * `fraction`     — `min(completed / total, 1)`, non-decreasing, `1.0` on the last chunk
    /// * `chunk`        — 1-indexed chunk just completed
    /// * `total_chunks` — `ceil(total_images / batch_size)`
    fn on_progress(&self, fraction: f64, chunk: usize, total_chunks: usize) {
        let _ = (fraction, chunk, total_chunks);
    }

    /// Called when one image's extraction failed and was degraded to empty.
    ///
    /// * `page_num` — 1-indexed position of the image in the whole input
    fn on_image_error(&self, page_num: usize, filename: &str, error: &str) {
        let _ = (page_num, filename, error);
    }

    /// Called once after the last chunk.
    fn on_batch_complete(&self, total_images: usize, total_records: usize) {
        let _ = (total_images, total_records);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

impl<F> BatchProgressCallback for F
where
    F: Fn(f64, usize, usize) + Send + Sync,
{
    fn on_progress(&self, fraction: f64, chunk: usize, total_chunks: usize) {
        self(fraction, chunk, total_chunks)
    }
}

/// Where a batch stands. Advanced once per chunk boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    /// 1-indexed chunk most recently completed; 0 before the first.
    pub current_chunk: usize,
    pub total_chunks: usize,
}

impl BatchProgress {
    pub fn new(total: usize, batch_size: usize) -> Self {
        Self {
            completed: 0,
            total,
            current_chunk: 0,
            total_chunks: total.div_ceil(batch_size.max(1)),
        }
    }

    /// Record that a chunk of `chunk_len` images has resolved.
    pub fn advance(&mut self, chunk_len: usize) {
        self.completed = (self.completed + chunk_len).min(self.total);
        self.current_chunk += 1;
    }

    /// `min(completed / total, 1)`; `1.0` for an empty batch.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.completed as f64 / self.total as f64).min(1.0)
    }
}
