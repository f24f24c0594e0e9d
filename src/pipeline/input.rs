//! Input loading: read a petition scan from disk (or accept bytes already in
//! memory) and decide whether it is a paginated document or a plain image.
//!
//! ## Why sniff magic bytes?
//!
//! Uploads arrive with whatever name the scanner or phone gave them. A PDF
//! saved as `scan.jpg` still starts with `%PDF`; trusting the bytes over the
//! extension routes it to pdfium instead of failing in the image decoder.

use crate::error::PetitionError;
use std::path::Path;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// How a source file is turned into page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Multi-page document, rasterised page by page.
    Pdf,
    /// Single raster image, decoded directly.
    Image,
}

/// One raw input file.
#[derive(Clone)]
pub struct SourceFile {
    /// Original file name (no directories), used for output naming.
    pub name: String,
    pub kind: SourceKind,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl SourceFile {
    /// Wrap bytes already in memory.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let kind = sniff_kind(&name, &bytes);
        Self { name, kind, bytes }
    }

    /// Read a file from disk.
    pub async fn from_path(path: &Path) -> Result<Self, PetitionError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PetitionError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => PetitionError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => PetitionError::Internal(format!("reading {}: {e}", path.display())),
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let source = Self::from_bytes(name, bytes);
        debug!(
            "Loaded {} ({:?}, {} bytes)",
            path.display(),
            source.kind,
            source.bytes.len()
        );
        Ok(source)
    }
}

/// `%PDF` magic wins; otherwise fall back to the extension.
pub fn sniff_kind(name: &str, bytes: &[u8]) -> SourceKind {
    if bytes.starts_with(PDF_MAGIC) || name.to_ascii_lowercase().ends_with(".pdf") {
        SourceKind::Pdf
    } else {
        SourceKind::Image
    }
}
