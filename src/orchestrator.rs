//! Pipeline orchestrator: one document in, one [`PipelineOutput`] out.
//!
//! ```text
//! input ──▶ rasterize ──▶ partition ──▶ dispatch (×N, concurrent) ──▶ assemble
//! (path/URL)  (pages)      (batches)     (cache + limiter + service)   (ordered)
//! ```
//!
//! Every batch runs as its own task in a [`JoinSet`]. The first failing batch
//! fails the request: the set is dropped, which aborts the remaining tasks
//! and returns their limiter permits. Cache entries already written stay.

use crate::cache::ContentCache;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::extract::Extractor;
use crate::output::{OutputMetadata, PipelineOutput, PipelineStats};
use crate::pipeline::assemble::assemble;
use crate::pipeline::dispatch::{BatchOutcome, Dispatcher, PageKeys};
use crate::pipeline::input::resolve_input;
use crate::pipeline::limiter::ConcurrencyLimiter;
use crate::pipeline::partition::{partition, Batch, PageUnit};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::prompts::{self, ResolvedPrompt};
use crate::rasterize::Rasterizer;
use crate::registry::RasterizerRegistry;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// How the pipeline finds a rasterizer for a document.
#[derive(Clone)]
enum RasterizerSource {
    Fixed(Arc<dyn Rasterizer>),
    ByExtension(RasterizerRegistry),
}

/// A configured extraction pipeline.
///
/// Holds the cache and the concurrency limiter, so every document processed
/// through the same `Pipeline` shares both.
pub struct Pipeline {
    config: PipelineConfig,
    rasterizers: RasterizerSource,
    extractor: Arc<dyn Extractor>,
    cache: Option<Arc<ContentCache>>,
    limiter: ConcurrencyLimiter,
    prompt: ResolvedPrompt,
    progress: ProgressCallback,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .field("prompt", &self.prompt.label)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// A pipeline that rasterizes every document with `rasterizer`.
    ///
    /// Validates `config` and, when caching is enabled, opens the cache at
    /// `config.cache_dir`.
    pub fn new(
        config: PipelineConfig,
        rasterizer: Arc<dyn Rasterizer>,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self, PipelineError> {
        Self::build(config, RasterizerSource::Fixed(rasterizer), extractor)
    }

    /// A pipeline that picks the rasterizer by file extension.
    pub fn with_registry(
        config: PipelineConfig,
        registry: RasterizerRegistry,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self, PipelineError> {
        Self::build(config, RasterizerSource::ByExtension(registry), extractor)
    }

    fn build(
        config: PipelineConfig,
        rasterizers: RasterizerSource,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let prompt = prompts::resolve(&config.prompt, config.output_format)?;
        let cache = if config.use_cache {
            Some(Arc::new(ContentCache::open(
                &config.cache_dir,
                config.cache_ttl,
            )?))
        } else {
            None
        };
        let limiter = ConcurrencyLimiter::new(config.max_concurrent);

        Ok(Self {
            config,
            rasterizers,
            extractor,
            cache,
            limiter,
            prompt,
            progress: Arc::new(NoopProgressCallback),
        })
    }

    /// Use an existing cache instead of the one opened from the config.
    /// Ignored when caching is disabled.
    pub fn with_cache(mut self, cache: Arc<ContentCache>) -> Self {
        if self.config.use_cache {
            self.cache = Some(cache);
        }
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&Arc<ContentCache>> {
        self.cache.as_ref()
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Process one document. Never fails: a failed request yields an output
    /// with empty content, `errors` and `failure` set.
    pub async fn process(&self, input: &str) -> PipelineOutput {
        let (metadata, stats, result) = self.run(input).await;
        match result {
            Ok(content) => PipelineOutput {
                content,
                metadata,
                stats,
                errors: Vec::new(),
                failure: None,
            },
            Err(e) => PipelineOutput::failed(metadata, stats, &e),
        }
    }

    /// Like [`process`](Self::process), returning the error instead.
    pub async fn try_process(&self, input: &str) -> Result<PipelineOutput, PipelineError> {
        let (metadata, stats, result) = self.run(input).await;
        Ok(PipelineOutput {
            content: result?,
            metadata,
            stats,
            errors: Vec::new(),
            failure: None,
        })
    }

    /// Process documents one after another, one output per input, in order.
    pub async fn process_many<S: AsRef<str>>(&self, inputs: &[S]) -> Vec<PipelineOutput> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            info!("Document {}/{}: {}", i + 1, inputs.len(), input.as_ref());
            outputs.push(self.process(input.as_ref()).await);
        }
        outputs
    }

    async fn run(
        &self,
        input: &str,
    ) -> (OutputMetadata, PipelineStats, Result<String, PipelineError>) {
        let start = Instant::now();
        let mut metadata = self.base_metadata(input);
        let mut stats = PipelineStats::default();

        let result = self.run_stages(input, &mut metadata, &mut stats).await;

        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(content) => info!(
                "'{}': {} units ({} cached, {} extracted, {} calls), {} bytes in {}ms",
                metadata.document,
                metadata.unit_count,
                stats.cached_units,
                stats.extracted_units,
                stats.extraction_calls,
                content.len(),
                stats.total_duration_ms
            ),
            Err(e) => error!("'{}' failed: {}", metadata.document, e),
        }
        self.progress
            .on_pipeline_complete(metadata.unit_count, result.is_ok());

        (metadata, stats, result)
    }

    async fn run_stages(
        &self,
        input: &str,
        metadata: &mut OutputMetadata,
        stats: &mut PipelineStats,
    ) -> Result<String, PipelineError> {
        // ── Validate ─────────────────────────────────────────────────────
        let resolved = resolve_input(input, self.config.download_timeout_secs).await?;
        metadata.document = resolved.document_stem();
        let rasterizer = self.rasterizer_for(resolved.path())?;

        // ── Rasterize ────────────────────────────────────────────────────
        let raster_start = Instant::now();
        let pages = rasterizer
            .rasterize(resolved.path(), self.config.page_range)
            .await?;
        stats.rasterize_duration_ms = raster_start.elapsed().as_millis() as u64;
        if pages.is_empty() {
            return Err(PipelineError::NoPages {
                document: metadata.document.clone(),
            });
        }
        info!(
            "Rasterized {} pages of '{}' in {}ms",
            pages.len(),
            metadata.document,
            stats.rasterize_duration_ms
        );

        // ── Partition ────────────────────────────────────────────────────
        let units: Vec<PageUnit> = pages
            .into_iter()
            .enumerate()
            .map(|(index, page)| PageUnit {
                index,
                page_number: page.page_number,
                image: page.image,
            })
            .collect();
        metadata.unit_count = units.len();
        let batches = partition(units, self.config.batch_size);
        stats.batches = batches.len();
        debug!(
            "{} units in {} batches of up to {}",
            metadata.unit_count, stats.batches, self.config.batch_size
        );
        self.progress
            .on_pipeline_start(metadata.unit_count, stats.batches);

        // ── Dispatch ─────────────────────────────────────────────────────
        let dispatch_start = Instant::now();
        let outcomes = self
            .run_batches(self.dispatcher(&metadata.document), batches)
            .await;
        stats.dispatch_duration_ms = dispatch_start.elapsed().as_millis() as u64;

        // ── Assemble ─────────────────────────────────────────────────────
        let mut results = Vec::with_capacity(metadata.unit_count);
        for outcome in outcomes? {
            stats.cached_units += outcome.cached;
            stats.extracted_units += outcome.extracted;
            stats.extraction_calls += outcome.calls;
            results.extend(outcome.results);
        }
        if results.len() != metadata.unit_count {
            return Err(PipelineError::Internal(format!(
                "{} results for {} units",
                results.len(),
                metadata.unit_count
            )));
        }
        assemble(results)
    }

    /// Run every batch concurrently; fail fast on the first error.
    async fn run_batches(
        &self,
        dispatcher: Dispatcher,
        batches: Vec<Batch>,
    ) -> Result<Vec<BatchOutcome>, PipelineError> {
        let total = batches.len();
        let mut tasks = JoinSet::new();

        for batch in batches {
            let dispatcher = dispatcher.clone();
            let progress = Arc::clone(&self.progress);
            tasks.spawn(async move {
                let number = batch.number;
                progress.on_batch_start(number, total, batch.len());
                let result = dispatcher.dispatch(batch).await;
                match &result {
                    Ok(outcome) => {
                        progress.on_batch_complete(number, total, outcome.cached, outcome.extracted)
                    }
                    Err(e) => progress.on_batch_error(number, total, &e.to_string()),
                }
                result
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => {
                    debug!("Aborting {} outstanding batches", tasks.len());
                    tasks.abort_all();
                    return Err(e);
                }
                Err(join_err) if join_err.is_panic() => {
                    std::panic::resume_unwind(join_err.into_panic())
                }
                Err(join_err) => {
                    return Err(PipelineError::Internal(format!(
                        "batch task cancelled: {join_err}"
                    )))
                }
            }
        }
        Ok(outcomes)
    }

    fn dispatcher(&self, document_stem: &str) -> Dispatcher {
        let keys = PageKeys::new(
            document_stem,
            self.config.output_format,
            self.prompt.fingerprint.clone(),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.extractor),
            self.limiter.clone(),
            self.prompt.text.as_str(),
            keys,
        )
        .with_timeout(self.config.extraction_timeout_secs.map(Duration::from_secs));

        match &self.cache {
            Some(cache) => dispatcher.with_cache(Arc::clone(cache)),
            None => dispatcher,
        }
    }

    fn rasterizer_for(&self, path: &Path) -> Result<Arc<dyn Rasterizer>, PipelineError> {
        match &self.rasterizers {
            RasterizerSource::Fixed(r) => Ok(Arc::clone(r)),
            RasterizerSource::ByExtension(registry) => registry.for_path(path, &self.config),
        }
    }

    fn base_metadata(&self, input: &str) -> OutputMetadata {
        let document = Path::new(input)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.to_string());
        OutputMetadata {
            document,
            unit_count: 0,
            batch_size: self.config.batch_size,
            max_concurrent: self.config.max_concurrent,
            page_range: self.config.page_range,
            output_format: self.config.output_format,
            prompt: self.prompt.label.clone(),
            cache_enabled: self.cache.is_some(),
        }
    }
}
