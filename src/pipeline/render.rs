//! PDF rasterisation: render every page to a `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool,
//! keeping Tokio worker threads free for in-flight vendor requests.
//!
//! ## Why scale, not a pixel cap?
//!
//! Petition sheets are all letter/A4. A fixed 2× upscale gives handwriting
//! enough pixels per stroke and keeps page images the same size across a
//! campaign, which keeps the crop fractions meaningful.
//!
//! ## Failure policy
//!
//! Not finding libpdfium is fatal: every document would silently come back
//! empty. A document that pdfium cannot open, or a page it cannot render,
//! only empties that one source.

use crate::error::PetitionError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Rasterise every page of a PDF held in memory.
///
/// Returns the pages in order. An unreadable document, or any page that
/// fails to render, yields an empty vector plus a warning.
pub async fn render_pdf_pages(
    name: &str,
    bytes: Vec<u8>,
    scale: f32,
    library: Option<&Path>,
) -> Result<Vec<DynamicImage>, PetitionError> {
    let name = name.to_string();
    let library = library.map(Path::to_path_buf);

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium(library.as_deref())?;
        Ok(render_pages_blocking(&pdfium, &name, &bytes, scale))
    })
    .await
    .map_err(|e| PetitionError::Internal(format!("Render task panicked: {}", e)))?
}

/// Bind to libpdfium at `library` (a file, or a directory holding the
/// platform library) or, with `None`, to the system library.
pub fn bind_pdfium(library: Option<&Path>) -> Result<Pdfium, PetitionError> {
    let bindings = match library {
        Some(path) => {
            let path: PathBuf = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(path)
            } else {
                path.to_path_buf()
            };
            debug!("Binding pdfium at {}", path.display());
            Pdfium::bind_to_library(&path)
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| PetitionError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page rendering.
fn render_pages_blocking(pdfium: &Pdfium, name: &str, bytes: &[u8], scale: f32) -> Vec<DynamicImage> {
    let document = match pdfium.load_pdf_from_byte_slice(bytes, None) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Skipping '{}': pdfium could not open it ({:?})", name, e);
            return Vec::new();
        }
    };

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("'{}' loaded: {} pages", name, total_pages);

    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
    let mut results = Vec::with_capacity(total_pages);

    for (idx, page) in pages.iter().enumerate() {
        let bitmap = match page.render_with_config(&render_config) {
            Ok(b) => b,
            Err(e) => {
                warn!(
                    "Skipping '{}': page {} failed to render ({:?})",
                    name,
                    idx + 1,
                    e
                );
                return Vec::new();
            }
        };

        let image = bitmap.as_image();
        debug!(
            "Rendered '{}' page {} → {}x{} px",
            name,
            idx + 1,
            image.width(),
            image.height()
        );
        results.push(image);
    }

    results
}
