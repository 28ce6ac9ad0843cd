//! # edgequake-docparse
//!
//! Extract structured content from multi-page documents with a vision model,
//! page by page, without paying twice for the same page.
//!
//! Extraction calls are slow, fallible and billed. The pipeline therefore
//! caches every page result on disk under a stable key, sends only cache
//! misses to the service, bounds how many calls are in flight, and puts the
//! results back into document order no matter when they complete.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document (path or URL)
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Rasterize  pages → images (pdfium for PDF, image crate for PNG/JPEG)
//!  ├─ 3. Partition  images → batches of `batch_size`
//!  ├─ 4. Dispatch   per batch, under the concurrency limiter:
//!  │                cache lookup → extract misses → cache write-back
//!  └─ 5. Assemble   results in page order, joined with blank lines
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docparse::{
//!     Pipeline, PipelineConfig, RasterizerRegistry, VisionExtractor, VisionOptions,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let extractor = VisionExtractor::from_options(VisionOptions::default())?;
//!     let config = PipelineConfig::builder().batch_size(1).max_concurrent(8).build()?;
//!     let pipeline =
//!         Pipeline::with_registry(config, RasterizerRegistry::with_defaults(), Arc::new(extractor))?;
//!
//!     let output = pipeline.try_process("document.pdf").await?;
//!     println!("{}", output.content);
//!     eprintln!("{} pages, {} from cache",
//!         output.metadata.unit_count,
//!         output.stats.cached_units);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docparse` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docparse = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod rasterize;
pub mod registry;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheError, CacheMeta, CachedPage, ContentCache};
pub use config::{OutputFormat, PageRange, PipelineConfig, PipelineConfigBuilder, PromptSource};
pub use error::{ErrorKind, ExtractionError, PipelineError, RasterizeError};
pub use extract::{BatchExtraction, Extractor, VisionExtractor, VisionOptions};
pub use orchestrator::Pipeline;
pub use output::{OutputMetadata, PipelineOutput, PipelineStats};
pub use pipeline::dispatch::{ExtractionResult, PageKeys};
pub use pipeline::limiter::ConcurrencyLimiter;
pub use pipeline::partition::{Batch, PageUnit};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use rasterize::{ImageRasterizer, PageImage, PdfiumRasterizer, Rasterizer};
pub use registry::RasterizerRegistry;
