//! Configuration types for petition extraction.
//!
//! Everything the pipeline reads at runtime lives in one immutable
//! [`PipelineConfig`], built once at process start via its
//! [`PipelineConfigBuilder`] and passed explicitly to the
//! [`crate::preprocess::ImagePreprocessor`] and the
//! [`crate::provider::ProviderGateway`]. Nothing is read from the environment
//! below this layer; the CLI maps its flags and env vars onto the builder.

use crate::error::PetitionError;
use crate::provider::retry::RetryPolicy;
use crate::provider::ProviderKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Vertical crop window applied to every petition page.
///
/// Both fractions are of the page height. The kept rows are the half-open
/// range `[floor(h·top), floor(h·bottom))`, which trims letterhead and
/// footer boilerplate so the vendor only sees the signature table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropConfig {
    #[serde(
        rename = "topCropFraction",
        alias = "TOP_CROP",
        alias = "top_crop_fraction",
        alias = "top"
    )]
    pub top_fraction: f64,

    #[serde(
        rename = "bottomCropFraction",
        alias = "BOTTOM_CROP",
        alias = "bottom_crop_fraction",
        alias = "bottom"
    )]
    pub bottom_fraction: f64,
}

impl CropConfig {
    /// Create a validated crop window.
    pub fn new(top_fraction: f64, bottom_fraction: f64) -> Result<Self, PetitionError> {
        let crop = Self {
            top_fraction,
            bottom_fraction,
        };
        crop.validate()?;
        Ok(crop)
    }

    /// Keep the whole page.
    pub fn full_page() -> Self {
        Self {
            top_fraction: 0.0,
            bottom_fraction: 1.0,
        }
    }

    /// Check `0 ≤ top < bottom ≤ 1`.
    pub fn validate(&self) -> Result<(), PetitionError> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(self.top_fraction) || !in_range(self.bottom_fraction) {
            return Err(PetitionError::InvalidConfig(format!(
                "crop fractions must be within [0, 1], got top={} bottom={}",
                self.top_fraction, self.bottom_fraction
            )));
        }
        if self.top_fraction >= self.bottom_fraction {
            return Err(PetitionError::InvalidConfig(format!(
                "top crop fraction ({}) must be below bottom crop fraction ({})",
                self.top_fraction, self.bottom_fraction
            )));
        }
        Ok(())
    }

    /// Row range `[start, end)` kept for a page of `height` pixels.
    pub fn row_range(&self, height: u32) -> (u32, u32) {
        let h = f64::from(height);
        let start = (h * self.top_fraction).floor() as u32;
        let end = (h * self.bottom_fraction).floor() as u32;
        (start.min(height), end.min(height))
    }

    /// Parse a crop document (`{"TOP_CROP": 0.2, "BOTTOM_CROP": 0.9}` or the
    /// camelCase / snake_case equivalents).
    pub fn from_json_str(json: &str) -> Result<Self, PetitionError> {
        let crop: CropConfig = serde_json::from_str(json)
            .map_err(|e| PetitionError::InvalidConfig(format!("crop config: {e}")))?;
        crop.validate()?;
        Ok(crop)
    }

    /// Read and parse a crop document from disk.
    pub fn from_json_file(path: &Path) -> Result<Self, PetitionError> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PetitionError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => PetitionError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => PetitionError::InvalidConfig(format!("crop config {}: {e}", path.display())),
        })?;
        Self::from_json_str(&text)
    }
}

/// Wire-level settings for one vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Endpoint URL. For Gemini this is the models base; the model and
    /// `:generateContent` are appended.
    pub endpoint: String,

    /// Model identifier sent with every request.
    pub model: String,

    /// Maximum output tokens per page. Default: 1000.
    ///
    /// A dense petition page holds ~20 signer rows of four short fields;
    /// 1000 tokens covers that with room to spare.
    pub max_tokens: u32,

    /// What to do when the vendor answers 429.
    pub retry: RetryPolicy,

    /// Delay inserted between consecutive dispatches inside one chunk.
    #[serde(default, with = "duration_ms_opt")]
    pub pacing: Option<Duration>,
}

impl ProviderSettings {
    /// Defaults for each vendor.
    ///
    /// Only Mistral gets a retry loop: it is the vendor known to rate limit
    /// aggressively, so it waits `attempt × 5s` between up to 3 attempts.
    pub fn defaults_for(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::OpenAi => Self {
                endpoint: "https://api.openai.com/v1/chat/completions".into(),
                model: "gpt-4o".into(),
                max_tokens: 1000,
                retry: RetryPolicy::none(),
                pacing: None,
            },
            ProviderKind::Mistral => Self {
                endpoint: "https://api.mistral.ai/v1/chat/completions".into(),
                model: "mistral-large-latest".into(),
                max_tokens: 1000,
                retry: RetryPolicy::linear(3, Duration::from_secs(5)),
                pacing: None,
            },
            ProviderKind::Gemini => Self {
                endpoint: "https://generativelanguage.googleapis.com/v1beta/models".into(),
                model: "gemini-2.0-flash".into(),
                max_tokens: 1000,
                retry: RetryPolicy::none(),
                pacing: None,
            },
        }
    }
}

/// Configuration for a petition extraction run.
///
/// # Example
/// ```rust
/// use petition_ocr::{CropConfig, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .crop(CropConfig::new(0.2, 0.9).unwrap())
///     .batch_size(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 5);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Crop window. `None` is allowed here so a missing crop document can be
    /// reported by the preprocessor before any work starts.
    pub crop: Option<CropConfig>,

    /// Upscale factor for rasterising paginated documents. Default: 2.0.
    ///
    /// Handwriting on a scanned sheet is small; rendering at 2× gives the
    /// vendor enough pixels per stroke without blowing past upload limits.
    pub render_scale: f32,

    /// Images in flight per chunk. Default: 10.
    pub batch_size: usize,

    /// Path to libpdfium (file, or directory holding the platform library).
    /// `None` binds to the system library.
    pub pdfium_library: Option<PathBuf>,

    /// Extraction prompt. If None, uses [`crate::prompts::DEFAULT_EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    pub openai: ProviderSettings,
    pub mistral: ProviderSettings,
    pub gemini: ProviderSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            crop: None,
            render_scale: 2.0,
            batch_size: 10,
            pdfium_library: None,
            prompt: None,
            openai: ProviderSettings::defaults_for(ProviderKind::OpenAi),
            mistral: ProviderSettings::defaults_for(ProviderKind::Mistral),
            gemini: ProviderSettings::defaults_for(ProviderKind::Gemini),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Settings for the given vendor.
    pub fn provider(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Mistral => &self.mistral,
            ProviderKind::Gemini => &self.gemini,
        }
    }

    fn provider_mut(&mut self, kind: ProviderKind) -> &mut ProviderSettings {
        match kind {
            ProviderKind::OpenAi => &mut self.openai,
            ProviderKind::Mistral => &mut self.mistral,
            ProviderKind::Gemini => &mut self.gemini,
        }
    }

    /// The prompt sent with every page.
    pub fn prompt_text(&self) -> &str {
        self.prompt
            .as_deref()
            .unwrap_or(crate::prompts::DEFAULT_EXTRACTION_PROMPT)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn crop(mut self, crop: CropConfig) -> Self {
        self.config.crop = Some(crop);
        self
    }

    pub fn maybe_crop(mut self, crop: Option<CropConfig>) -> Self {
        self.config.crop = crop;
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    /// Replace all settings for one vendor.
    pub fn provider_settings(mut self, kind: ProviderKind, settings: ProviderSettings) -> Self {
        *self.config.provider_mut(kind) = settings;
        self
    }

    pub fn model(mut self, kind: ProviderKind, model: impl Into<String>) -> Self {
        self.config.provider_mut(kind).model = model.into();
        self
    }

    pub fn endpoint(mut self, kind: ProviderKind, endpoint: impl Into<String>) -> Self {
        self.config.provider_mut(kind).endpoint = endpoint.into();
        self
    }

    pub fn max_tokens(mut self, kind: ProviderKind, n: u32) -> Self {
        self.config.provider_mut(kind).max_tokens = n;
        self
    }

    pub fn retry(mut self, kind: ProviderKind, policy: RetryPolicy) -> Self {
        self.config.provider_mut(kind).retry = policy;
        self
    }

    pub fn pacing(mut self, kind: ProviderKind, pacing: Option<Duration>) -> Self {
        self.config.provider_mut(kind).pacing = pacing;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PetitionError> {
        let c = &self.config;
        if c.batch_size == 0 {
            return Err(PetitionError::InvalidConfig("batch size must be ≥ 1".into()));
        }
        if !(c.render_scale > 0.0 && c.render_scale <= 8.0) {
            return Err(PetitionError::InvalidConfig(format!(
                "render scale must be in (0, 8], got {}",
                c.render_scale
            )));
        }
        if let Some(crop) = &c.crop {
            crop.validate()?;
        }
        for kind in ProviderKind::ALL {
            let p = c.provider(kind);
            if p.max_tokens == 0 {
                return Err(PetitionError::InvalidConfig(format!(
                    "{kind}: max tokens must be ≥ 1"
                )));
            }
            if p.retry.max_attempts == 0 {
                return Err(PetitionError::InvalidConfig(format!(
                    "{kind}: retry policy needs at least one attempt"
                )));
            }
        }
        Ok(self.config)
    }
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
