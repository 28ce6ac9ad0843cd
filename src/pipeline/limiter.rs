//! Concurrency limiter: a ceiling on batches in flight.
//!
//! A thin wrapper over [`tokio::sync::Semaphore`]. Acquisition waits while the
//! ceiling is reached; it never rejects work. The returned [`LimiterPermit`]
//! releases on drop, so the permit comes back on every exit path of the
//! holder: normal return, `?` error, panic unwind, or the holding task being
//! aborted.

use crate::error::PipelineError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Shared pool of `max` permits. Clones share the pool.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

/// A held permit. Dropping it releases the slot.
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// Create a limiter with `max` permits (at least 1).
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Wait for a free permit.
    ///
    /// Cancel-safe: dropping the returned future before it resolves does not
    /// leak a permit.
    pub async fn acquire(&self) -> Result<LimiterPermit, PipelineError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Internal("concurrency limiter closed".into()))?;
        trace!("Limiter permit acquired ({} free)", self.available());
        Ok(LimiterPermit { _permit: permit })
    }

    /// Refuse all future acquisitions. Waiters fail with `Internal`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.max - self.available()
    }

    pub fn max(&self) -> usize {
        self.max
    }
}
