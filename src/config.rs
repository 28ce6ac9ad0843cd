//! Configuration types for the extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The values that influence extracted content
//! (output format, prompt) also feed the cache key, so two differently
//! configured runs over the same document never share cache entries.
//!
//! The values that shape scheduling (`batch_size`, `max_concurrent`) are echoed
//! back in [`crate::output::OutputMetadata`] so a run can be reproduced.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for one pipeline.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_docparse::{PageRange, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .batch_size(4)
///     .max_concurrent(8)
///     .page_range(PageRange::new(2, 10).unwrap())
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 4);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pages per batch. Every batch is dispatched under one limiter permit.
    /// Default: 1.
    pub batch_size: usize,

    /// Maximum number of batches in flight at once. Default: 15.
    ///
    /// Since a batch issues at most one extraction call at a time, this is
    /// also the ceiling on concurrent calls to the extraction service.
    pub max_concurrent: usize,

    /// Restrict processing to a 1-based inclusive page range. Default: all pages.
    pub page_range: Option<PageRange>,

    /// Requested output flavour. Default: [`OutputFormat::Markdown`].
    pub output_format: OutputFormat,

    /// Extraction prompt. Default: the bundled prompt for `output_format`.
    pub prompt: PromptSource,

    /// Read and write the content cache. Default: true.
    pub use_cache: bool,

    /// Directory holding cache entries. Default: `./cache`.
    pub cache_dir: PathBuf,

    /// Entries older than this are treated as absent. Default: never expire.
    pub cache_ttl: Option<Duration>,

    /// Upper bound on one extraction call, in seconds. Default: none.
    pub extraction_timeout_secs: Option<u64>,

    /// Rendering DPI used when rasterising PDF pages. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Password for encrypted PDFs.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            max_concurrent: 15,
            page_range: None,
            output_format: OutputFormat::default(),
            prompt: PromptSource::default(),
            use_cache: true,
            cache_dir: PathBuf::from("cache"),
            cache_ttl: None,
            extraction_timeout_secs: None,
            dpi: 150,
            max_rendered_pixels: 2000,
            password: None,
            download_timeout_secs: 120,
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

    /// Check the invariants `build()` enforces. Useful after mutating fields directly.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch size must be ≥ 1".into(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(PipelineError::InvalidConfig(
                "max concurrent must be ≥ 1".into(),
            ));
        }
        if let Some(range) = self.page_range {
            PageRange::new(range.start, range.end)?;
        }
        if self.dpi < 72 || self.dpi > 400 {
            return Err(PipelineError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                self.dpi
            )));
        }
        if self.cache_ttl == Some(Duration::ZERO) {
            return Err(PipelineError::InvalidConfig(
                "cache TTL must be non-zero; disable the cache instead".into(),
            ));
        }
        crate::prompts::resolve(&self.prompt, self.output_format)?;
        Ok(())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.max_concurrent = n;
        self
    }

    pub fn page_range(mut self, range: PageRange) -> Self {
        self.config.page_range = Some(range);
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn prompt(mut self, prompt: PromptSource) -> Self {
        self.config.prompt = prompt;
        self
    }

    pub fn use_cache(mut self, v: bool) -> Self {
        self.config.use_cache = v;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = Some(ttl);
        self
    }

    pub fn extraction_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extraction_timeout_secs = Some(secs);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Value types ──────────────────────────────────────────────────────────

/// A 1-based, inclusive page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    /// Create a range, rejecting `start < 1` and `end < start`.
    pub fn new(start: usize, end: usize) -> Result<Self, PipelineError> {
        if start < 1 {
            return Err(PipelineError::InvalidConfig(format!(
                "pages are 1-indexed, minimum is 1 (got {start})"
            )));
        }
        if end < start {
            return Err(PipelineError::InvalidConfig(format!(
                "invalid page range '{start}-{end}': start must be <= end"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of pages covered by the range.
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, page: usize) -> bool {
        page >= self.start && page <= self.end
    }

    /// 0-based page indices of the range, clipped to `total_pages`.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let s = self.start - 1;
        let e = self.end.min(total_pages);
        (s..e).collect()
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for PageRange {
    type Err = PipelineError;

    /// Parse `"3-15"` or a single page `"5"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse = |v: &str| {
            v.trim().parse::<usize>().map_err(|_| {
                PipelineError::InvalidConfig(format!("invalid page number '{}'", v.trim()))
            })
        };
        match s.split_once('-') {
            Some((start, end)) => PageRange::new(parse(start)?, parse(end)?),
            None => {
                let page = parse(s)?;
                PageRange::new(page, page)
            }
        }
    }
}

/// Output flavour requested from the extraction service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown text (default).
    #[default]
    Markdown,
    /// A JSON document per page.
    Json,
}

impl OutputFormat {
    /// Stable lowercase name, used in cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown output format '{other}' (expected markdown or json)"
            ))),
        }
    }
}

/// Where the extraction prompt comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptSource {
    /// The bundled prompt for the configured [`OutputFormat`] (default).
    #[default]
    Default,
    /// A bundled template by name (see [`crate::prompts::TEMPLATE_NAMES`]).
    Template(String),
    /// Literal prompt text supplied by the caller.
    Custom(String),
}

impl PromptSource {
    /// Treat `s` as a template name when one is bundled under that name,
    /// otherwise as literal prompt text.
    pub fn from_name_or_text(s: impl Into<String>) -> Self {
        let s = s.into();
        if crate::prompts::template(&s).is_some() {
            PromptSource::Template(s)
        } else {
            PromptSource::Custom(s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_original_settings() {
        let c = PipelineConfig::default();
        assert_eq!(c.batch_size, 1);
        assert_eq!(c.max_concurrent, 15);
        assert!(c.use_cache);
        assert!(c.page_range.is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn build_rejects_zero_batch_size() {
        let err = PipelineConfig::builder().batch_size(0).build().unwrap_err();
        assert!(err.to_string().contains("batch size"), "got: {err}");
    }

    #[test]
    fn build_rejects_zero_concurrency() {
        assert!(PipelineConfig::builder().max_concurrent(0).build().is_err());
    }

    #[test]
    fn build_rejects_unknown_template() {
        let err = PipelineConfig::builder()
            .prompt(PromptSource::Template("no-such-template".into()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no-such-template"), "got: {err}");
    }

    #[test]
    fn dpi_is_clamped() {
        let c = PipelineConfig::builder().dpi(1000).build().unwrap();
        assert_eq!(c.dpi, 400);
    }

    #[test]
    fn page_range_validation() {
        assert!(PageRange::new(0, 3).is_err());
        assert!(PageRange::new(4, 3).is_err());
        let r = PageRange::new(2, 3).unwrap();
        assert_eq!(r.len(), 2);
        assert!(r.contains(2) && r.contains(3) && !r.contains(4));
    }

    #[test]
    fn page_range_indices_are_clipped() {
        let r = PageRange::new(3, 10).unwrap();
        assert_eq!(r.to_indices(4), vec![2, 3]);
        assert_eq!(PageRange::new(6, 8).unwrap().to_indices(5), Vec::<usize>::new());
    }

    #[test]
    fn page_range_parsing() {
        assert_eq!("2-3".parse::<PageRange>().unwrap(), PageRange { start: 2, end: 3 });
        assert_eq!(" 5 ".parse::<PageRange>().unwrap(), PageRange { start: 5, end: 5 });
        assert!("3-1".parse::<PageRange>().is_err());
        assert!("a-b".parse::<PageRange>().is_err());
        assert_eq!(PageRange::new(2, 3).unwrap().to_string(), "2-3");
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!("MD".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn prompt_source_detects_bundled_templates() {
        assert_eq!(
            PromptSource::from_name_or_text("tables"),
            PromptSource::Template("tables".into())
        );
        assert_eq!(
            PromptSource::from_name_or_text("Transcribe only the footnotes."),
            PromptSource::Custom("Transcribe only the footnotes.".into())
        );
    }
}
