//! Configuration for the schematic-extraction pipeline.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Callers set only what they care about and rely
//! on the defaults for the rest.

use crate::backend::VisionBackend;
use crate::error::SchematicError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default ceiling on rasterised pages per document.
pub const DEFAULT_PAGE_CAP: usize = 20;

/// Default number of page images per classification request.
pub const DEFAULT_CLASSIFY_BATCH_SIZE: usize = 5;

/// Configuration for one [`crate::orchestrator::Pipeline`].
///
/// # Example
/// ```rust
/// use edgequake_schematic::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .page_cap(10)
///     .classify_batch_size(4)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.page_cap, 10);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Maximum number of pages rasterised from one document. Default: 20.
    ///
    /// Pages past the cap are dropped without an error.
    pub page_cap: usize,

    /// Page images per classification request. Default: 5.
    ///
    /// Larger batches mean fewer round trips but bigger request bodies; five
    /// pages at scale 2.0 stays comfortably under common upload limits.
    pub classify_batch_size: usize,

    /// Render scale relative to the page's native size. Range: 0.5–4.0. Default: 2.0.
    pub render_scale: f32,

    /// Longest-edge pixel cap applied after scaling. Default: 4000.
    pub max_rendered_pixels: u32,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    pub provider_name: Option<String>,

    /// Pre-constructed backend. Takes precedence over `provider_name`.
    pub backend: Option<Arc<dyn VisionBackend>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Max output tokens for an extraction call. Default: 8192.
    ///
    /// A dense schematic can list a hundred components plus their nets.
    pub max_tokens: usize,

    /// Max output tokens for a classification call. Default: 256.
    pub classify_max_tokens: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Directory for persisted projects. None disables auto-save.
    pub store_dir: Option<PathBuf>,

    /// Custom extraction instruction. If None, uses the built-in prompt.
    pub extraction_prompt: Option<String>,

    /// Optional per-stage progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_cap: DEFAULT_PAGE_CAP,
            classify_batch_size: DEFAULT_CLASSIFY_BATCH_SIZE,
            render_scale: 2.0,
            max_rendered_pixels: 4000,
            model: None,
            provider_name: None,
            backend: None,
            temperature: 0.1,
            max_tokens: 8192,
            classify_max_tokens: 256,
            download_timeout_secs: 120,
            store_dir: None,
            extraction_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("page_cap", &self.page_cap)
            .field("classify_batch_size", &self.classify_batch_size)
            .field("render_scale", &self.render_scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn VisionBackend>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("store_dir", &self.store_dir)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Default on-disk project store: `<data dir>/edgequake-schematic/projects`.
    pub fn default_store_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("edgequake-schematic").join("projects"))
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn page_cap(mut self, n: usize) -> Self {
        self.config.page_cap = n;
        self
    }

    pub fn classify_batch_size(mut self, n: usize) -> Self {
        self.config.classify_batch_size = n;
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn classify_max_tokens(mut self, n: usize) -> Self {
        self.config.classify_max_tokens = n;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.store_dir = Some(dir.into());
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, SchematicError> {
        let c = &self.config;
        if c.page_cap == 0 {
            return Err(SchematicError::InvalidConfig(
                "Page cap must be ≥ 1".into(),
            ));
        }
        if c.classify_batch_size == 0 {
            return Err(SchematicError::InvalidConfig(
                "Classification batch size must be ≥ 1".into(),
            ));
        }
        if !(0.5..=4.0).contains(&c.render_scale) {
            return Err(SchematicError::InvalidConfig(format!(
                "Render scale must be 0.5–4.0, got {}",
                c.render_scale
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.page_cap, 20);
        assert_eq!(c.classify_batch_size, 5);
        assert_eq!(c.render_scale, 2.0);
        assert!(c.store_dir.is_none());
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = PipelineConfig::builder()
            .classify_batch_size(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("batch size"));
    }

    #[test]
    fn zero_page_cap_rejected() {
        assert!(PipelineConfig::builder().page_cap(0).build().is_err());
    }

    #[test]
    fn render_scale_out_of_range_rejected() {
        assert!(PipelineConfig::builder().render_scale(8.0).build().is_err());
        assert!(PipelineConfig::builder().render_scale(1.5).build().is_ok());
    }
}
