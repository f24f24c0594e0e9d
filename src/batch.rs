//! BatchOrchestrator: drive many page images through one gateway.
//!
//! ## Why chunks with a barrier?
//!
//! Every image in a chunk is dispatched at once; the next chunk starts only
//! after every request in the current one has resolved. That bounds
//! in-flight vendor calls to `batch_size`, gives natural backpressure, and
//! gives progress reporting a well-defined point to fire.
//!
//! ## Failure isolation
//!
//! A failed `extract` for one image becomes an empty record list plus a
//! [`PageError`] in that image's [`ImageOutcome`]. The one exception is
//! [`PetitionError::RetriesExhausted`]: a vendor that is still rate limiting
//! after its whole retry policy is out of capacity, and the run stops once
//! the current chunk has resolved.

use crate::credentials::ProviderCredential;
use crate::error::{PageError, PetitionError};
use crate::output::{BatchOutput, ImageOutcome};
use crate::pipeline::encode::EncodedImage;
use crate::progress::{BatchProgress, BatchProgressCallback};
use crate::provider::ProviderGateway;
use crate::record::{annotate, ExtractionRecord};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Runs a whole image set through a [`ProviderGateway`] chunk by chunk.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    gateway: Arc<ProviderGateway>,
    batch_size: usize,
}

impl BatchOrchestrator {
    pub fn new(gateway: Arc<ProviderGateway>, batch_size: usize) -> Result<Self, PetitionError> {
        if batch_size == 0 {
            return Err(PetitionError::InvalidConfig("batch size must be ≥ 1".into()));
        }
        Ok(Self {
            gateway,
            batch_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Extract every image, in order.
    ///
    /// Records come back in input-image order, then vendor row order, with
    /// `page_number` = the image's 1-based input position and `row_number`
    /// = 1-based position within that image's rows.
    pub async fn run(
        &self,
        images: &[EncodedImage],
        prompt: &str,
        credential: &ProviderCredential,
        progress: &dyn BatchProgressCallback,
    ) -> Result<BatchOutput, PetitionError> {
        let mut state = BatchProgress::new(images.len(), self.batch_size);
        if images.is_empty() {
            debug!("No images to extract");
            return Ok(BatchOutput::default());
        }

        info!(
            "{}: extracting {} image(s) in {} chunk(s) of ≤{}",
            self.gateway.kind(),
            state.total,
            state.total_chunks,
            self.batch_size
        );
        progress.on_batch_start(state.total, state.total_chunks);

        let gateway = &*self.gateway;
        let pacing = gateway.pacing();
        let mut output = BatchOutput {
            records: Vec::new(),
            images: Vec::with_capacity(images.len()),
        };

        for (chunk_idx, chunk) in images.chunks(self.batch_size).enumerate() {
            let base = chunk_idx * self.batch_size;

            let mut results: Vec<(usize, Result<Vec<ExtractionRecord>, PetitionError>)> =
                stream::iter(chunk.iter().enumerate().map(|(k, image)| async move {
                    if let Some(step) = pacing {
                        if k > 0 {
                            sleep(step * k as u32).await;
                        }
                    }
                    (base + k, gateway.extract(image, prompt, credential).await)
                }))
                .buffer_unordered(chunk.len())
                .collect()
                .await;

            // Wire completion order is arbitrary; restore input order.
            results.sort_by_key(|(idx, _)| *idx);

            for (idx, result) in results {
                let image = &images[idx];
                let page_number = idx + 1;

                let (records, error) = match result {
                    Ok(records) => (records, None),
                    Err(e) if e.escapes_batch() => {
                        warn!("Stopping batch at '{}': {}", image.name, e);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!("'{}' yielded no records: {}", image.name, e);
                        progress.on_image_error(page_number, &image.name, &e.to_string());
                        let page_error = PageError::ExtractionFailed {
                            page: page_number,
                            filename: image.name.clone(),
                            detail: e.to_string(),
                        };
                        (Vec::new(), Some(page_error))
                    }
                };

                let records: Vec<ExtractionRecord> = records
                    .into_iter()
                    .map(ExtractionRecord::normalized)
                    .filter(|r| !r.is_blank())
                    .collect();

                output.images.push(ImageOutcome {
                    page_number,
                    filename: image.name.clone(),
                    record_count: records.len(),
                    error,
                });
                output.records.extend(annotate(records, idx, &image.name));
            }

            state.advance(chunk.len());
            debug!(
                "Chunk {}/{} done ({}/{} images)",
                state.current_chunk, state.total_chunks, state.completed, state.total
            );
            progress.on_progress(state.fraction(), state.current_chunk, state.total_chunks);
        }

        info!(
            "{}: {} record(s) from {} image(s), {} failed",
            gateway.kind(),
            output.records.len(),
            output.images.len(),
            output.failed_images()
        );
        progress.on_batch_complete(state.total, output.records.len());

        Ok(output)
    }
}
