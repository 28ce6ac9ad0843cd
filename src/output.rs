//! Result types returned by the pipeline.

use crate::config::{OutputFormat, PageRange};
use crate::error::{ErrorKind, PipelineError};
use serde::{Deserialize, Serialize};

/// The final product of one pipeline request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// Ordered, joined, normalised content. Empty when the request failed.
    pub content: String,
    pub metadata: OutputMetadata,
    pub stats: PipelineStats,
    /// Human-readable failure descriptions; empty on success.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Failure classification; `None` on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ErrorKind>,
}

/// Describes the request that produced a [`PipelineOutput`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputMetadata {
    /// Document file stem.
    pub document: String,
    /// Units (pages) in the requested range.
    pub unit_count: usize,
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub page_range: Option<PageRange>,
    pub output_format: OutputFormat,
    /// Template name, or `"custom"`.
    pub prompt: String,
    pub cache_enabled: bool,
}

/// Counters and timings for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub cached_units: usize,
    pub extracted_units: usize,
    pub extraction_calls: usize,
    pub batches: usize,
    pub rasterize_duration_ms: u64,
    pub dispatch_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl PipelineOutput {
    /// A failed request: empty content, the error's description and kind.
    pub fn failed(metadata: OutputMetadata, stats: PipelineStats, error: &PipelineError) -> Self {
        Self {
            content: String::new(),
            metadata,
            stats,
            errors: vec![error.to_string()],
            failure: Some(error.kind()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Content on success, the first error description otherwise.
    pub fn into_result(self) -> Result<String, String> {
        match self.failure {
            None => Ok(self.content),
            Some(_) => Err(self
                .errors
                .into_iter()
                .next()
                .unwrap_or_else(|| "pipeline failed".to_string())),
        }
    }
}
