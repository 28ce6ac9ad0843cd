//! Progress-callback trait for batch-level pipeline events.
//!
//! Attach an [`Arc<dyn PipelineProgressCallback>`] with
//! [`crate::Pipeline::with_progress`] to receive events while a document is
//! processed. Callers can forward them to a terminal progress bar, a channel,
//! or a log without the library knowing how the host communicates.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docparse::PipelineProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_batch_complete(&self, batch: usize, total: usize, cached: usize, extracted: usize) {
//!         let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("batch {}/{} ({} cached, {} extracted, {} done)", batch + 1, total, cached, extracted, done);
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes batches.
///
/// Batches run concurrently, so the batch methods may be called from several
/// threads at once and in any order. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once after rasterization, before any batch is dispatched.
    fn on_pipeline_start(&self, total_units: usize, total_batches: usize) {
        let _ = (total_units, total_batches);
    }

    /// Called when a batch task starts (before it waits for a permit).
    ///
    /// `batch` is 0-based.
    fn on_batch_start(&self, batch: usize, total_batches: usize, units: usize) {
        let _ = (batch, total_batches, units);
    }

    /// Called when a batch finished successfully.
    fn on_batch_complete(&self, batch: usize, total_batches: usize, cached: usize, extracted: usize) {
        let _ = (batch, total_batches, cached, extracted);
    }

    /// Called when a batch failed. The request fails with it.
    fn on_batch_error(&self, batch: usize, total_batches: usize, error: &str) {
        let _ = (batch, total_batches, error);
    }

    /// Called once when the request finished, successfully or not.
    fn on_pipeline_complete(&self, total_units: usize, success: bool) {
        let _ = (total_units, success);
    }
}

/// A no-op implementation, used when no callback is attached.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
