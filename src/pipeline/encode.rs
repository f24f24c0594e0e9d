//! Image encoding: normalised page → base64 PNG in an [`EncodedImage`].
//!
//! The payload carries no `data:` prefix. OpenAI and Mistral want a data
//! URL, Gemini wants raw base64 in `inline_data`; each adapter adds what its
//! wire format needs via [`EncodedImage::data_url`] or the raw field.

use crate::error::PetitionError;
use crate::preprocess::NormalizedImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// A normalised page ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Deterministic page name, e.g. `ward7_page2.png`.
    pub name: String,
    /// 1-based page index within its source file.
    pub page_index: usize,
    /// Base64 PNG, no prefix.
    pub data: String,
    pub mime_type: String,
}

impl EncodedImage {
    /// `data:<mime>;base64,<payload>`.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Raw PNG bytes.
    pub fn decode_png(&self) -> Result<Vec<u8>, PetitionError> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| PetitionError::Internal(format!("invalid base64 payload: {e}")))
    }
}

/// Encode a normalised page as a base64 PNG.
///
/// ## Why PNG?
/// Lossless compression preserves pen strokes. JPEG artefacts around
/// handwriting confuse vision models, and the round trip must reproduce
/// the greyscale buffer exactly.
pub fn encode_image(image: &NormalizedImage) -> Result<EncodedImage, PetitionError> {
    let png = image.to_png()?;
    let data = STANDARD.encode(&png);
    debug!("Encoded '{}' → {} bytes base64", image.name, data.len());

    Ok(EncodedImage {
        name: image.name.clone(),
        page_index: image.page_index,
        data,
        mime_type: "image/png".to_string(),
    })
}
