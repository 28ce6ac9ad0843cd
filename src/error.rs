//! Error types for the edgequake-docparse library.
//!
//! The taxonomy is closed. Every failure a caller can recover from falls into
//! one of four kinds, reported by [`PipelineError::kind`]:
//!
//! * **Validation** — the input document is missing, unreadable, empty, or of
//!   an unsupported type. Detected before any extraction work.
//! * **Rasterization** — the page rasterizer could not produce images.
//! * **Cache** — the content cache failed to read or write
//!   (see [`crate::cache::CacheError`]).
//! * **Extraction** — the extraction service failed or returned nothing usable
//!   (see [`ExtractionError`]).
//!
//! Configuration errors ([`PipelineError::InvalidConfig`],
//! [`PipelineError::ProviderNotConfigured`]) are rejected before a pipeline is
//! constructed and never reach [`crate::Pipeline::process`].

use crate::cache::CacheError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-docparse library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists but contains zero bytes.
    #[error("Document '{path}' is empty")]
    EmptyDocument { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// No rasterizer is registered for the document's extension.
    #[error("Unsupported document type '{extension}' for '{path}'")]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The rasterizer produced no pages for the requested range.
    #[error("Document '{document}' has no pages to process")]
    NoPages { document: String },

    // ── Rasterization errors ──────────────────────────────────────────────
    /// The page rasterizer failed.
    #[error(transparent)]
    Rasterization(#[from] RasterizeError),

    // ── Cache errors ──────────────────────────────────────────────────────
    /// Content cache I/O or serialisation failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The extraction service failed for the given pages (1-indexed).
    #[error("Extraction failed for page(s) {pages:?}: {source}")]
    Extraction {
        pages: Vec<usize>,
        #[source]
        source: ExtractionError,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// An internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Classify this error into the closed set of failure kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::FileNotFound { .. }
            | PipelineError::PermissionDenied { .. }
            | PipelineError::EmptyDocument { .. }
            | PipelineError::InvalidInput { .. }
            | PipelineError::UnsupportedFormat { .. }
            | PipelineError::DownloadFailed { .. }
            | PipelineError::DownloadTimeout { .. }
            | PipelineError::NoPages { .. } => ErrorKind::Validation,
            PipelineError::Rasterization(_) => ErrorKind::Rasterization,
            PipelineError::Cache(_) => ErrorKind::Cache,
            PipelineError::Extraction { .. } => ErrorKind::Extraction,
            PipelineError::InvalidConfig(_) | PipelineError::ProviderNotConfigured { .. } => {
                ErrorKind::Config
            }
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Coarse classification of a [`PipelineError`].
///
/// Serialised into [`crate::output::PipelineOutput::failure`] so callers that
/// only see JSON can still branch on the kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Rasterization,
    Cache,
    Extraction,
    Config,
    Internal,
}

/// A failure reported by the extraction service client.
///
/// The pipeline never retries these; retry with backoff is the job of the
/// client (see [`crate::extract::VisionExtractor`]).
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    /// The service call failed after the client's own retries.
    #[error("service call failed after {retries} retries: {detail}")]
    ServiceFailed { retries: u32, detail: String },

    /// The service answered but the answer was empty.
    #[error("service returned no usable output")]
    EmptyResponse,

    /// The call did not finish within the configured timeout.
    #[error("service call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// A page image could not be encoded for the request.
    #[error("image encoding failed: {0}")]
    Encode(String),

    /// Batch mode returned a per-unit list of the wrong length.
    #[error("batch returned {got} results for {expected} pages")]
    ResultCountMismatch { expected: usize, got: usize },
}

/// A failure reported by a page rasterizer.
#[derive(Debug, Error)]
pub enum RasterizeError {
    /// The document header/trailer is corrupt and cannot be parsed.
    #[error("Document '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    /// The document requires a password but none (or a wrong one) was given.
    #[error("Document '{path}' is encrypted; provide the correct password")]
    PasswordRequired { path: PathBuf },

    /// Requested page lies beyond the end of the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// The backend failed to render one page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    PageFailed { page: usize, detail: String },

    /// Could not bind to the pdfium shared library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    Binding(String),

    /// Could not read or decode the source file.
    #[error("Failed to read '{path}': {detail}")]
    Read { path: PathBuf, detail: String },

    /// The blocking render task panicked or was cancelled.
    #[error("Render task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_kinds() {
        let e = PipelineError::EmptyDocument {
            path: PathBuf::from("a.pdf"),
        };
        assert_eq!(e.kind(), ErrorKind::Validation);
        assert!(e.to_string().contains("a.pdf"));

        let e = PipelineError::NoPages {
            document: "report".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Validation);
    }

    #[test]
    fn extraction_display_lists_pages() {
        let e = PipelineError::Extraction {
            pages: vec![3, 4],
            source: ExtractionError::Timeout { secs: 30 },
        };
        assert_eq!(e.kind(), ErrorKind::Extraction);
        let msg = e.to_string();
        assert!(msg.contains("[3, 4]"), "got: {msg}");
        assert!(msg.contains("30s"), "got: {msg}");
    }

    #[test]
    fn rasterize_converts_into_pipeline_error() {
        let e: PipelineError = RasterizeError::PageOutOfRange { page: 9, total: 5 }.into();
        assert_eq!(e.kind(), ErrorKind::Rasterization);
        assert!(e.to_string().contains("document has 5 pages"));
    }

    #[test]
    fn config_errors_are_not_runtime_kinds() {
        let e = PipelineError::InvalidConfig("batch size must be >= 1".into());
        assert_eq!(e.kind(), ErrorKind::Config);
        let e = PipelineError::ProviderNotConfigured {
            provider: "openai".into(),
            hint: "set OPENAI_API_KEY".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Config);
    }

    #[test]
    fn error_kind_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorKind::Rasterization).unwrap();
        assert_eq!(json, "\"rasterization\"");
    }
}
