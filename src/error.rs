//! Error types for the petition-ocr library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PetitionError`] — **Fatal**: the job cannot proceed (crop config
//!   missing, credential not found, pdfium unavailable, storage failed).
//!   Returned as `Err(PetitionError)` from the component that hit it.
//!
//! * [`PageError`] — **Non-fatal**: one petition page failed at the vendor
//!   but every other page is fine. Stored inside
//!   [`crate::output::ImageOutcome`] while the page itself contributes an
//!   empty record set.
//!
//! The one crossing between the two is [`PetitionError::RetriesExhausted`]:
//! a vendor that kept answering 429 through its whole retry policy is a
//! capacity failure, so the batch stops instead of degrading the page.

use crate::provider::ProviderKind;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the petition-ocr library.
#[derive(Debug, Error)]
pub enum PetitionError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// No crop configuration was supplied; nothing may be preprocessed.
    #[error("Crop configuration is missing.\nProvide topCropFraction/bottomCropFraction (e.g. --crop-config crop.json).")]
    MissingCropConfig,

    /// Builder or document validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Paginated documents are rasterised with pdfium. Either:\n\
  • install libpdfium system-wide, or\n\
  • set PDFIUM_LIB_PATH=/path/to/libpdfium (file or containing directory).\n"
    )]
    PdfiumBindingFailed(String),

    // ── Credential errors ─────────────────────────────────────────────────
    /// No credential is stored for the (owner, provider) pair.
    #[error("No {provider} credential stored for owner '{owner}'")]
    CredentialNotFound { owner: String, provider: ProviderKind },

    /// A credential exists but has been deactivated.
    #[error("The {provider} credential for owner '{owner}' is inactive")]
    CredentialInactive { owner: String, provider: ProviderKind },

    /// Ciphertext could not be decoded or authenticated.
    #[error("Credential could not be decrypted: {0}")]
    CredentialDecryptFailed(String),

    // ── Provider errors ───────────────────────────────────────────────────
    /// HTTP 401: bad or revoked credential. Not retried.
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthFailed { provider: ProviderKind, detail: String },

    /// HTTP 429 from the vendor.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimited { provider: ProviderKind },

    /// HTTP 400: the vendor rejected the request shape. Not retried.
    #[error("Provider '{provider}' rejected the request: {detail}")]
    BadRequest { provider: ProviderKind, detail: String },

    /// Any other HTTP status, or a transport failure (`status` is `None`).
    #[error("Provider '{provider}' failed{}: {detail}", status_suffix(.status))]
    ProviderFailed {
        provider: ProviderKind,
        status: Option<u16>,
        detail: String,
    },

    /// Every attempt of a multi-attempt retry policy was rate limited.
    #[error("Provider '{provider}' still rate limited after {attempts} attempts: {last}")]
    RetriesExhausted {
        provider: ProviderKind,
        attempts: u32,
        #[source]
        last: Box<PetitionError>,
    },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Campaign keys name storage locations and must be plain identifiers.
    #[error("Invalid campaign key '{0}'")]
    InvalidCampaignKey(String),

    /// `replace` failed part-way; `possibly_inconsistent` flags mixed state.
    #[error("Storage {stage} failed for campaign '{campaign}': {detail}{}", inconsistency_note(.possibly_inconsistent))]
    Storage {
        campaign: String,
        stage: StorageStage,
        detail: String,
        possibly_inconsistent: bool,
    },

    /// The post-persist matching procedure could not be invoked.
    #[error("Matching procedure '{procedure}' failed: {detail}")]
    MatchingFailed { procedure: String, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PetitionError {
    /// Whether this is a plain vendor 429 that a retry policy may absorb.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PetitionError::RateLimited { .. })
    }

    /// Whether the batch must stop rather than degrade the page to empty.
    pub fn escapes_batch(&self) -> bool {
        matches!(self, PetitionError::RetriesExhausted { .. })
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with HTTP {s}")).unwrap_or_default()
}

fn inconsistency_note(possibly_inconsistent: &bool) -> &'static str {
    if *possibly_inconsistent {
        " (stored rows may be inconsistent)"
    } else {
        ""
    }
}

/// Which part of a replace operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StorageStage {
    Delete,
    Insert,
    Commit,
}

impl std::fmt::Display for StorageStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StorageStage::Delete => "delete",
            StorageStage::Insert => "insert",
            StorageStage::Commit => "commit",
        })
    }
}

/// A non-fatal error for a single petition page.
///
/// The page contributes zero records; the batch continues.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The vendor call failed and was not retried (or not retryable).
    #[error("Page {page} ({filename}): extraction failed: {detail}")]
    ExtractionFailed {
        page: usize,
        filename: String,
        detail: String,
    },
}
