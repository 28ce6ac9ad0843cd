//! Pipeline stages.
//!
//! Each submodule implements one step and is tested on its own.
//! [`crate::orchestrator::Pipeline`] wires them together.
//!
//! ```text
//! input ──▶ partition ──▶ dispatch ──▶ assemble
//!                           │  ▲
//!                 limiter ──┘  └── cache / extractor (encode)
//! ```
//!
//! 1. [`input`]     — canonicalise the user-supplied path or URL to a local file
//! 2. [`partition`] — split rasterized pages into fixed-size batches
//! 3. [`limiter`]   — ceiling on batches in flight
//! 4. [`dispatch`]  — per batch: cache lookups, extraction of misses, write-back
//! 5. [`assemble`]  — restore document order and join
//! 6. [`encode`]    — PNG + base64 for the vision API request body

pub mod assemble;
pub mod dispatch;
pub mod encode;
pub mod input;
pub mod limiter;
pub mod partition;
