//! Page normalisation: vertical crop, greyscale, deterministic naming.
//!
//! Every page, rendered or decoded, goes through the same two steps so the
//! vendor always sees the signature table alone, in grey.

use super::input::SourceKind;
use crate::config::CropConfig;
use image::{DynamicImage, GrayImage, Luma};
use once_cell::sync::Lazy;
use regex::Regex;

/// Keep rows `[floor(h·top), floor(h·bottom))` at full width.
///
/// Returns `None` when the window holds no rows (a very short image).
pub fn crop_vertical(img: &DynamicImage, crop: &CropConfig) -> Option<DynamicImage> {
    let (start, end) = crop.row_range(img.height());
    if end <= start || img.width() == 0 {
        return None;
    }
    Some(img.crop_imm(0, start, img.width(), end - start))
}

/// Luma per pixel as `round(0.299 R + 0.587 G + 0.114 B)`; alpha is ignored.
pub fn to_greyscale(img: &DynamicImage) -> GrayImage {
    let rgb = img.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let grey = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
        Luma([grey.round().clamp(0.0, 255.0) as u8])
    })
}

static RE_PDF_EXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.pdf$").unwrap());
static RE_IMAGE_EXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.(jpg|jpeg|png)$").unwrap());

/// Output name for one normalised page.
///
/// * PDF page `i` (1-based) of `minutes.pdf` → `minutes_page<i>.png`
/// * `sheet.JPG` → `sheet_cropped.png`
pub fn normalized_name(source_name: &str, kind: SourceKind, page_index: usize) -> String {
    match kind {
        SourceKind::Pdf => format!("{}_page{}.png", RE_PDF_EXT.replace(source_name, ""), page_index),
        SourceKind::Image => format!("{}_cropped.png", RE_IMAGE_EXT.replace(source_name, "")),
    }
}
