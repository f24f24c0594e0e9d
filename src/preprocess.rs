//! ImagePreprocessor: raw petition scans → ordered, normalised page images.
//!
//! ## Failure policy
//!
//! * No crop window configured → [`PetitionError::MissingCropConfig`] from
//!   [`ImagePreprocessor::new`], before any file is touched.
//! * A corrupt image, an unreadable PDF, or a zero-page PDF contributes no
//!   pages; sibling sources are unaffected.
//! * A page too short to hold a single cropped row is skipped with a warning.
//! * Failing to bind libpdfium is fatal.

use crate::config::{CropConfig, PipelineConfig};
use crate::error::PetitionError;
use crate::pipeline::input::{SourceFile, SourceKind};
use crate::pipeline::normalize::{crop_vertical, normalized_name, to_greyscale};
use crate::pipeline::render::render_pdf_pages;
use image::{GrayImage, ImageFormat};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A cropped, greyscale petition page.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    /// Deterministic output name (see [`normalized_name`]).
    pub name: String,
    pub source_name: String,
    /// 1-based page index within the source file.
    pub page_index: usize,
    pub pixels: GrayImage,
}

impl NormalizedImage {
    /// Lossless PNG encoding of the pixel buffer.
    pub fn to_png(&self) -> Result<Vec<u8>, PetitionError> {
        let mut buf = Vec::new();
        self.pixels
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| PetitionError::Internal(format!("PNG encode of '{}': {e}", self.name)))?;
        Ok(buf)
    }
}

/// Crops and greyscales every page of every source, in input order.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    crop: CropConfig,
    render_scale: f32,
    pdfium_library: Option<PathBuf>,
}

impl ImagePreprocessor {
    /// Fails with [`PetitionError::MissingCropConfig`] when `config.crop` is `None`.
    pub fn new(config: &PipelineConfig) -> Result<Self, PetitionError> {
        let crop = config.crop.ok_or(PetitionError::MissingCropConfig)?;
        crop.validate()?;
        Ok(Self {
            crop,
            render_scale: config.render_scale,
            pdfium_library: config.pdfium_library.clone(),
        })
    }

    pub fn crop(&self) -> &CropConfig {
        &self.crop
    }

    /// Normalise one source file.
    pub async fn preprocess(&self, source: &SourceFile) -> Result<Vec<NormalizedImage>, PetitionError> {
        let pages = match source.kind {
            SourceKind::Pdf => {
                render_pdf_pages(
                    &source.name,
                    source.bytes.clone(),
                    self.render_scale,
                    self.pdfium_library.as_deref(),
                )
                .await?
            }
            SourceKind::Image => match image::load_from_memory(&source.bytes) {
                Ok(img) => vec![img],
                Err(e) => {
                    warn!("Skipping '{}': not a decodable image ({})", source.name, e);
                    Vec::new()
                }
            },
        };

        if pages.is_empty() {
            warn!("'{}' produced no pages", source.name);
        }

        let mut out = Vec::with_capacity(pages.len());
        for (idx, page) in pages.iter().enumerate() {
            let page_index = idx + 1;
            let Some(cropped) = crop_vertical(page, &self.crop) else {
                warn!(
                    "Skipping '{}' page {}: {} px tall leaves nothing after cropping",
                    source.name,
                    page_index,
                    page.height()
                );
                continue;
            };
            let pixels = to_greyscale(&cropped);
            let name = normalized_name(&source.name, source.kind, page_index);
            debug!("Normalised {} → {}x{}", name, pixels.width(), pixels.height());
            out.push(NormalizedImage {
                name,
                source_name: source.name.clone(),
                page_index,
                pixels,
            });
        }

        Ok(out)
    }

    /// Normalise every source in order; output order follows input order.
    pub async fn preprocess_all(&self, sources: &[SourceFile]) -> Result<Vec<NormalizedImage>, PetitionError> {
        let mut images = Vec::new();
        for source in sources {
            images.extend(self.preprocess(source).await?);
        }
        info!(
            "Preprocessed {} source(s) → {} page image(s)",
            sources.len(),
            images.len()
        );
        Ok(images)
    }
}

/// Names that occur more than once, in first-seen order.
///
/// `a.png` and `a.jpg` both normalise to `a_cropped.png`.
pub fn duplicate_names(images: &[NormalizedImage]) -> Vec<&str> {
    let mut seen = HashSet::new();
    let mut dups = Vec::new();
    for image in images {
        let name = image.name.as_str();
        if !seen.insert(name) && !dups.contains(&name) {
            dups.push(name);
        }
    }
    dups
}

/// Write normalised pages as PNG files under `dir`, named by
/// [`NormalizedImage::name`]. Existing files are overwritten, so a name
/// shared by two pages keeps only the later one.
pub async fn save_images(images: &[NormalizedImage], dir: &Path) -> Result<Vec<PathBuf>, PetitionError> {
    for name in duplicate_names(images) {
        warn!("'{}' is produced by more than one page; the last one wins on disk", name);
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| PetitionError::Internal(format!("creating {}: {e}", dir.display())))?;

    let mut written = Vec::with_capacity(images.len());
    for image in images {
        let path = dir.join(&image.name);
        tokio::fs::write(&path, image.to_png()?)
            .await
            .map_err(|e| PetitionError::Internal(format!("writing {}: {e}", path.display())))?;
        written.push(path);
    }
    Ok(written)
}
