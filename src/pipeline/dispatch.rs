//! Cache-aware dispatcher: one batch in, one ordered set of results out.
//!
//! Per batch, under a single limiter permit:
//!
//! 1. look every unit up in the cache (a read failure counts as a miss),
//! 2. extract the misses: one pending unit → single mode, several → one
//!    batch-mode call,
//! 3. write the fresh results back,
//! 4. merge hits and fresh results by index.
//!
//! The permit is held across the whole sequence so the number of
//! extraction calls in flight never exceeds the limiter ceiling.

use crate::cache::{CachedPage, ContentCache};
use crate::config::OutputFormat;
use crate::error::{ExtractionError, PipelineError};
use crate::extract::{BatchExtraction, Extractor};
use crate::pipeline::limiter::ConcurrencyLimiter;
use crate::pipeline::partition::{Batch, PageUnit};
use crate::prompts::fingerprint;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Extracted content for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub index: usize,
    pub page_number: usize,
    pub content: String,
    /// `true` when served from the cache.
    pub cached: bool,
}

/// Results of one batch plus the counters the orchestrator aggregates.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Sorted by `index`.
    pub results: Vec<ExtractionResult>,
    pub cached: usize,
    pub extracted: usize,
    /// Extraction service calls made (0 or 1).
    pub calls: usize,
}

/// Derives stable cache keys for the pages of one document.
///
/// `{stem}_{format}_page_{n}` for the default prompt,
/// `{stem}_{format}_{fingerprint}_page_{n}` for any other. See [`key_stem`]
/// for how the document stem is made file-name safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageKeys {
    stem: String,
    format: OutputFormat,
    fingerprint: Option<String>,
}

impl PageKeys {
    pub fn new(document_stem: &str, format: OutputFormat, fingerprint: Option<String>) -> Self {
        Self {
            stem: key_stem(document_stem),
            format,
            fingerprint,
        }
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn key(&self, page_number: usize) -> String {
        match &self.fingerprint {
            Some(fp) => format!("{}_{}_{}_page_{}", self.stem, self.format, fp, page_number),
            None => format!("{}_{}_page_{}", self.stem, self.format, page_number),
        }
    }
}

/// Longest sanitized stem kept verbatim in a key, in bytes.
pub const MAX_KEY_STEM_BYTES: usize = 100;

/// The stem part of a cache key.
///
/// The sanitized stem when sanitizing left it unchanged and short enough.
/// Otherwise the sanitized stem cut to [`MAX_KEY_STEM_BYTES`] plus `-` and a
/// digest of the raw stem, so distinct names never share keys and file
/// names stay under the filesystem limit.
pub fn key_stem(document_stem: &str) -> String {
    let mut stem = sanitize_stem(document_stem);
    if stem == document_stem && stem.len() <= MAX_KEY_STEM_BYTES {
        return stem;
    }
    let mut cut = MAX_KEY_STEM_BYTES.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    stem.truncate(cut);
    stem.push('-');
    stem.push_str(&fingerprint(document_stem));
    stem
}

/// Restrict a document stem to `[A-Za-z0-9._-]` so it is safe as a file name.
///
/// Runs of dots collapse so the result never contains `..`.
pub fn sanitize_stem(stem: &str) -> String {
    let mut out = String::with_capacity(stem.len());
    for c in stem.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
            c
        } else {
            '_'
        };
        if c == '.' && out.ends_with('.') {
            continue;
        }
        out.push(c);
    }
    if out.is_empty() || out == "." {
        return "document".to_string();
    }
    out
}

/// Runs batches against the cache and the extraction service.
///
/// Cheap to clone; one clone moves into each batch task.
#[derive(Clone)]
pub struct Dispatcher {
    cache: Option<Arc<ContentCache>>,
    extractor: Arc<dyn Extractor>,
    limiter: ConcurrencyLimiter,
    prompt: Arc<str>,
    keys: Arc<PageKeys>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("cache", &self.cache.as_ref().map(|c| c.dir().to_path_buf()))
            .field("limiter", &self.limiter)
            .field("keys", &self.keys)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// A dispatcher without a cache: every unit is extracted.
    pub fn new(
        extractor: Arc<dyn Extractor>,
        limiter: ConcurrencyLimiter,
        prompt: impl Into<Arc<str>>,
        keys: PageKeys,
    ) -> Self {
        Self {
            cache: None,
            extractor,
            limiter,
            prompt: prompt.into(),
            keys: Arc::new(keys),
            timeout: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Bound each extraction call. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn keys(&self) -> &PageKeys {
        &self.keys
    }

    /// Process one batch.
    ///
    /// Fails on an extraction error or a cache write error. Entries cached
    /// before the failure stay valid.
    pub async fn dispatch(&self, batch: Batch) -> Result<BatchOutcome, PipelineError> {
        let _permit = self.limiter.acquire().await?;
        let batch_number = batch.number;

        let mut results = Vec::with_capacity(batch.len());
        let mut pending = Vec::new();
        for unit in batch.units {
            match self.lookup(&unit).await {
                Some(content) => results.push(ExtractionResult {
                    index: unit.index,
                    page_number: unit.page_number,
                    content,
                    cached: true,
                }),
                None => pending.push(unit),
            }
        }
        let cached = results.len();

        let (fresh, calls) = if pending.is_empty() {
            (Vec::new(), 0)
        } else {
            let fresh = self.extract(&pending).await.map_err(|source| {
                PipelineError::Extraction {
                    pages: pending.iter().map(|u| u.page_number).collect(),
                    source,
                }
            })?;
            (fresh, 1)
        };
        let extracted = fresh.len();

        for (unit, content) in pending.iter().zip(fresh) {
            self.store(unit, &content).await?;
            results.push(ExtractionResult {
                index: unit.index,
                page_number: unit.page_number,
                content,
                cached: false,
            });
        }

        results.sort_by_key(|r| r.index);
        debug!(
            "Batch {}: {} cached, {} extracted, {} call(s)",
            batch_number, cached, extracted, calls
        );

        Ok(BatchOutcome {
            results,
            cached,
            extracted,
            calls,
        })
    }

    async fn lookup(&self, unit: &PageUnit) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let key = self.keys.key(unit.page_number);
        match cache.get::<CachedPage>(&key).await {
            Ok(hit) => hit.map(|p| p.content),
            Err(e) => {
                warn!("Cache read for '{}' failed, re-extracting: {}", key, e);
                None
            }
        }
    }

    async fn store(&self, unit: &PageUnit, content: &str) -> Result<(), PipelineError> {
        let Some(cache) = self.cache.as_ref() else {
            return Ok(());
        };
        let entry = CachedPage {
            content: content.to_string(),
            page: unit.page_number,
        };
        cache.set(&self.keys.key(unit.page_number), &entry).await?;
        Ok(())
    }

    /// One service call for all `pending` units; one string per unit back.
    async fn extract(&self, pending: &[PageUnit]) -> Result<Vec<String>, ExtractionError> {
        if let [unit] = pending {
            let content = self
                .bounded(self.extractor.extract_single(&unit.image, &self.prompt))
                .await?;
            return Ok(vec![content]);
        }

        let images: Vec<&DynamicImage> = pending.iter().map(|u| &u.image).collect();
        let reply = self
            .bounded(self.extractor.extract_batch(&images, &self.prompt))
            .await?;

        match reply {
            BatchExtraction::Combined(content) => {
                debug!(
                    "Combined batch result applied to {} units",
                    pending.len()
                );
                Ok(vec![content; pending.len()])
            }
            BatchExtraction::PerUnit(contents) if contents.len() == pending.len() => Ok(contents),
            BatchExtraction::PerUnit(contents) => Err(ExtractionError::ResultCountMismatch {
                expected: pending.len(),
                got: contents.len(),
            }),
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ExtractionError>>,
    ) -> Result<T, ExtractionError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ExtractionError::Timeout {
                    secs: limit.as_secs(),
                })?,
            None => call.await,
        }
    }
}
