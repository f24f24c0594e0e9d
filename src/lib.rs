//! # petition-ocr
//!
//! Digitise scanned paper petitions with vision language models.
//!
//! ## Why this crate?
//!
//! Petition sheets are handwritten tables: name, address, date, ward, one
//! signer per row. Classic OCR engines do poorly on handwriting and know
//! nothing about table rows. Instead this crate crops each page down to the
//! signature table, greys it, and asks a vision model to read the rows back
//! as JSON, then numbers and stores them per campaign for voter-roll matching.
//!
//! ## Pipeline Overview
//!
//! ```text
//! files (PDF / images)
//!  │
//!  ├─ 1. Preprocess  rasterise PDFs (pdfium, 2×), crop, greyscale
//!  ├─ 2. Encode      PNG → base64
//!  ├─ 3. Extract     chunked concurrent vendor calls (OpenAI / Mistral / Gemini)
//!  ├─ 4. Annotate    page_number + row_number + filename on every row
//!  ├─ 5. Persist     replace the campaign's rows in a ResultSink
//!  └─ 6. Match       invoke the matching procedure by name
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use petition_ocr::{
//!     CredentialSource, CropConfig, JobRequest, NoopProgressCallback, PetitionJob,
//!     PipelineConfig, ProviderKind, ReqwestTransport, SourceFile,
//! };
//! use std::sync::Arc;
//! use zeroize::Zeroizing;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .crop(CropConfig::new(0.2, 0.9)?)
//!         .build()?;
//!     let key = Zeroizing::new(std::env::var("MISTRAL_API_KEY")?);
//!     let job = PetitionJob::new(config, Arc::new(ReqwestTransport::new()), CredentialSource::Plain(key));
//!
//!     let sources = vec![SourceFile::from_path("ward7.pdf".as_ref()).await?];
//!     let request = JobRequest { provider: ProviderKind::Mistral, campaign_key: None };
//!     let output = job.run(&sources, &request, &NoopProgressCallback).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.records)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `petition-ocr` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! petition-ocr = { version = "0.3", default-features = false }
//! ```
//!
//! ## Vendors
//!
//! | Provider | Default model | 429 handling |
//! |----------|---------------|--------------|
//! | `openai`  | `gpt-4o`               | surfaced, page degraded to empty |
//! | `mistral` | `mistral-large-latest` | 3 attempts, 5 s × attempt backoff |
//! | `gemini`  | `gemini-2.0-flash`     | surfaced, page degraded to empty |
//!
//! Both retry and inter-request pacing are per-provider settings in
//! [`ProviderSettings`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod credentials;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod preprocess;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod record;
pub mod sink;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::BatchOrchestrator;
pub use config::{CropConfig, PipelineConfig, PipelineConfigBuilder, ProviderSettings};
pub use credentials::{
    CredentialCipher, CredentialStore, EncryptedSecret, FileCredentialStore, MemoryCredentialStore,
    ProviderCredential,
};
pub use error::{PageError, PetitionError, StorageStage};
pub use job::{CredentialSource, JobRequest, PetitionJob};
pub use output::{BatchOutput, ImageOutcome, JobOutput, JobStats, MatchingOutcome};
pub use pipeline::encode::{encode_image, EncodedImage};
pub use pipeline::input::{SourceFile, SourceKind};
pub use preprocess::{ImagePreprocessor, NormalizedImage};
pub use progress::{BatchProgress, BatchProgressCallback, NoopProgressCallback};
pub use provider::retry::{Backoff, RetryPolicy};
pub use provider::transport::{HttpReply, HttpTransport, ReqwestTransport, TransportError, VendorRequest};
pub use provider::{ProviderGateway, ProviderKind, VendorAdapter};
pub use record::{AnnotatedRecord, ExtractionRecord};
pub use sink::{JsonFileSink, MatchingProcedure, MemorySink, ResultSink, RpcMatchingProcedure, SinkReport};
