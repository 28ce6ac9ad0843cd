//! Integration tests for the extraction pipeline.
//!
//! The rasterizer and the extraction service are replaced by in-process
//! fakes, so these run offline and fast. Cache directories live in
//! `TempDir`s.

use async_trait::async_trait;
use edgequake_docparse::{
    BatchExtraction, CachedPage, ContentCache, ErrorKind, ExtractionError, Extractor, PageImage,
    PageRange, Pipeline, PipelineConfig, PipelineProgressCallback, RasterizeError, Rasterizer,
};
use image::{DynamicImage, RgbaImage};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// A document of `pages` pages; each image is `page_number` pixels wide.
struct FakeRasterizer {
    pages: usize,
    calls: Mutex<Vec<Option<PageRange>>>,
}

impl FakeRasterizer {
    fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Option<PageRange>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        _document: &Path,
        range: Option<PageRange>,
    ) -> Result<Vec<PageImage>, RasterizeError> {
        self.calls.lock().unwrap().push(range);
        let indices = match range {
            Some(r) => r.to_indices(self.pages),
            None => (0..self.pages).collect(),
        };
        Ok(indices
            .into_iter()
            .map(|i| PageImage {
                page_number: i + 1,
                image: DynamicImage::ImageRgba8(RgbaImage::new(i as u32 + 1, 1)),
            })
            .collect())
    }
}

/// Answers `"page {n}"` per image, with configurable delays and failures.
#[derive(Default)]
struct FakeExtractor {
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    /// Delay for a call whose first page is `n`: `delay(n)`.
    delay: Option<fn(usize) -> Duration>,
    fail_page: Option<usize>,
    panic_page: Option<usize>,
    combined: bool,
}

impl FakeExtractor {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, pages: Vec<usize>) -> Result<Vec<String>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay(pages[0])).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panic_page.is_some_and(|p| pages.contains(&p)) {
            panic!("extractor exploded");
        }
        if self.fail_page.is_some_and(|p| pages.contains(&p)) {
            return Err(ExtractionError::ServiceFailed {
                retries: 3,
                detail: "HTTP 503".into(),
            });
        }
        Ok(pages.iter().map(|p| format!("page {p}")).collect())
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract_single(
        &self,
        image: &DynamicImage,
        _prompt: &str,
    ) -> Result<String, ExtractionError> {
        let mut out = self.answer(vec![image.width() as usize]).await?;
        Ok(out.remove(0))
    }

    async fn extract_batch(
        &self,
        images: &[&DynamicImage],
        _prompt: &str,
    ) -> Result<BatchExtraction, ExtractionError> {
        let pages = images.iter().map(|i| i.width() as usize).collect();
        let out = self.answer(pages).await?;
        if self.combined {
            Ok(BatchExtraction::Combined(out.join(" | ")))
        } else {
            Ok(BatchExtraction::PerUnit(out))
        }
    }
}

#[derive(Default)]
struct CountingProgress {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl PipelineProgressCallback for CountingProgress {
    fn on_batch_start(&self, _batch: usize, _total: usize, _units: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, _batch: usize, _total: usize, _cached: usize, _extracted: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_error(&self, _batch: usize, _total: usize, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Fixture {
    dir: TempDir,
    document: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let document = dir.path().join("report.pdf");
        std::fs::write(&document, b"%PDF-1.7 fake").unwrap();
        Self { dir, document }
    }

    fn input(&self) -> &str {
        self.document.to_str().unwrap()
    }

    fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    fn config(&self, batch_size: usize, max_concurrent: usize) -> PipelineConfig {
        PipelineConfig::builder()
            .batch_size(batch_size)
            .max_concurrent(max_concurrent)
            .cache_dir(self.cache_dir())
            .build()
            .unwrap()
    }
}

fn expected(pages: impl IntoIterator<Item = usize>) -> String {
    pages
        .into_iter()
        .map(|p| format!("page {p}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_page_appears_exactly_once() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor::default());
    let pipeline =
        Pipeline::new(fx.config(3, 4), FakeRasterizer::new(7), extractor.clone()).unwrap();

    let out = pipeline.process(fx.input()).await;
    assert!(out.is_success(), "{:?}", out.errors);
    assert_eq!(out.content, expected(1..=7));
    assert_eq!(out.metadata.unit_count, 7);
    assert_eq!(out.metadata.document, "report");
    assert_eq!(out.stats.batches, 3);
    assert_eq!(extractor.calls(), 3);
}

#[tokio::test]
async fn second_run_is_served_entirely_from_cache() {
    let fx = Fixture::new();
    let first_extractor = Arc::new(FakeExtractor::default());
    let first = Pipeline::new(fx.config(2, 4), FakeRasterizer::new(5), first_extractor.clone())
        .unwrap()
        .process(fx.input())
        .await;
    assert_eq!(first_extractor.calls(), 3);

    let second_extractor = Arc::new(FakeExtractor::default());
    let second = Pipeline::new(fx.config(2, 4), FakeRasterizer::new(5), second_extractor.clone())
        .unwrap()
        .process(fx.input())
        .await;

    assert_eq!(second_extractor.calls(), 0);
    assert_eq!(second.content, first.content);
    assert_eq!(second.stats.cached_units, 5);
    assert_eq!(second.stats.extraction_calls, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn order_survives_out_of_order_completion() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor {
        // Earlier pages finish last.
        delay: Some(|page| Duration::from_millis((12 - page as u64) * 10)),
        ..Default::default()
    });
    let pipeline =
        Pipeline::new(fx.config(1, 12), FakeRasterizer::new(12), extractor.clone()).unwrap();

    let out = pipeline.process(fx.input()).await;
    assert_eq!(out.content, expected(1..=12));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_calls_never_exceed_ceiling() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor {
        delay: Some(|_| Duration::from_millis(15)),
        ..Default::default()
    });
    let pipeline =
        Pipeline::new(fx.config(1, 3), FakeRasterizer::new(12), extractor.clone()).unwrap();

    let out = pipeline.process(fx.input()).await;
    assert!(out.is_success());
    let peak = extractor.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak in-flight was {peak}");
    assert!(peak >= 1);
    assert_eq!(pipeline.limiter().available(), 3);
}

#[tokio::test]
async fn page_range_restricts_units_and_keys() {
    let fx = Fixture::new();
    let rasterizer = FakeRasterizer::new(5);
    let config = PipelineConfig::builder()
        .page_range(PageRange::new(2, 3).unwrap())
        .cache_dir(fx.cache_dir())
        .build()
        .unwrap();
    let pipeline =
        Pipeline::new(config, rasterizer.clone(), Arc::new(FakeExtractor::default())).unwrap();

    let out = pipeline.process(fx.input()).await;
    assert_eq!(out.metadata.unit_count, 2);
    assert_eq!(out.metadata.page_range, Some(PageRange::new(2, 3).unwrap()));
    assert_eq!(out.content, expected(2..=3));
    assert_eq!(rasterizer.calls(), vec![Some(PageRange::new(2, 3).unwrap())]);

    let cache = pipeline.cache().unwrap();
    for page in [2, 3] {
        let key = format!("report_markdown_page_{page}");
        let entry: CachedPage = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.page, page);
    }
    let absent: Option<CachedPage> = cache.get("report_markdown_page_1").await.unwrap();
    assert!(absent.is_none());
}

#[tokio::test]
async fn failed_batch_fails_request_but_keeps_finished_pages() {
    let fx = Fixture::new();
    let failing = Arc::new(FakeExtractor {
        delay: Some(|page| Duration::from_millis(if page == 6 { 50 } else { 0 })),
        fail_page: Some(6),
        ..Default::default()
    });
    let progress = Arc::new(CountingProgress::default());
    let pipeline = Pipeline::new(fx.config(1, 6), FakeRasterizer::new(6), failing)
        .unwrap()
        .with_progress(progress.clone());

    let out = pipeline.process(fx.input()).await;
    assert!(out.content.is_empty());
    assert_eq!(out.failure, Some(ErrorKind::Extraction));
    assert!(out.errors[0].contains("[6]"), "{:?}", out.errors);
    assert_eq!(progress.failed.load(Ordering::SeqCst), 1);

    // A retry only pays for the page that failed.
    let healthy = Arc::new(FakeExtractor::default());
    let retry = Pipeline::new(fx.config(1, 6), FakeRasterizer::new(6), healthy.clone())
        .unwrap()
        .process(fx.input())
        .await;
    assert!(retry.is_success());
    assert_eq!(healthy.calls(), 1);
    assert_eq!(retry.content, expected(1..=6));
}

#[tokio::test]
async fn missing_document_fails_validation_without_work() {
    let fx = Fixture::new();
    let rasterizer = FakeRasterizer::new(3);
    let extractor = Arc::new(FakeExtractor::default());
    let pipeline = Pipeline::new(fx.config(1, 2), rasterizer.clone(), extractor.clone()).unwrap();

    let missing = fx.dir.path().join("absent.pdf");
    let out = pipeline.process(missing.to_str().unwrap()).await;
    assert!(out.content.is_empty());
    assert_eq!(out.failure, Some(ErrorKind::Validation));
    assert!(rasterizer.calls().is_empty());
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn empty_rasterization_is_reported() {
    let fx = Fixture::new();
    let pipeline = Pipeline::new(
        fx.config(1, 2),
        FakeRasterizer::new(0),
        Arc::new(FakeExtractor::default()),
    )
    .unwrap();

    let err = pipeline.try_process(fx.input()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn disabled_cache_always_extracts() {
    let fx = Fixture::new();
    let config = PipelineConfig::builder()
        .use_cache(false)
        .cache_dir(fx.cache_dir())
        .build()
        .unwrap();
    let extractor = Arc::new(FakeExtractor::default());
    let pipeline = Pipeline::new(config, FakeRasterizer::new(2), extractor.clone()).unwrap();

    pipeline.process(fx.input()).await;
    let out = pipeline.process(fx.input()).await;
    assert_eq!(extractor.calls(), 4);
    assert!(!out.metadata.cache_enabled);
    assert!(pipeline.cache().is_none());
    assert!(!fx.cache_dir().exists());
}

#[tokio::test]
async fn combined_batch_result_is_stored_for_each_page() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor {
        combined: true,
        ..Default::default()
    });
    let pipeline =
        Pipeline::new(fx.config(2, 2), FakeRasterizer::new(2), extractor.clone()).unwrap();

    let out = pipeline.process(fx.input()).await;
    assert_eq!(extractor.calls(), 1);
    assert_eq!(out.content, "page 1 | page 2\n\npage 1 | page 2");

    let again = pipeline.process(fx.input()).await;
    assert_eq!(extractor.calls(), 1);
    assert_eq!(again.content, out.content);
}

#[tokio::test]
async fn custom_prompt_uses_separate_cache_entries() {
    let fx = Fixture::new();
    let cache = Arc::new(ContentCache::open(fx.cache_dir(), None).unwrap());
    let extractor = Arc::new(FakeExtractor::default());

    let default_run = Pipeline::new(fx.config(1, 2), FakeRasterizer::new(1), extractor.clone())
        .unwrap()
        .with_cache(cache.clone());
    default_run.process(fx.input()).await;

    let custom_config = PipelineConfig::builder()
        .prompt(edgequake_docparse::PromptSource::Custom("Only the footnotes".into()))
        .cache_dir(fx.cache_dir())
        .build()
        .unwrap();
    let custom_run = Pipeline::new(custom_config, FakeRasterizer::new(1), extractor.clone())
        .unwrap()
        .with_cache(cache.clone());
    let out = custom_run.process(fx.input()).await;

    assert_eq!(extractor.calls(), 2);
    assert_eq!(out.metadata.prompt, "custom");
    let names: HashSet<String> = std::fs::read_dir(fx.cache_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".json") && !n.ends_with(".meta.json"))
        .collect();
    assert_eq!(names.len(), 2, "{names:?}");
    assert!(names.contains("report_markdown_page_1.json"));
}

#[tokio::test]
async fn process_many_keeps_input_order() {
    let fx = Fixture::new();
    let second = fx.dir.path().join("appendix.pdf");
    std::fs::write(&second, b"%PDF-1.7 fake").unwrap();
    let pipeline = Pipeline::new(
        fx.config(1, 2),
        FakeRasterizer::new(1),
        Arc::new(FakeExtractor::default()),
    )
    .unwrap();

    let inputs = [
        fx.input().to_string(),
        "/missing.pdf".to_string(),
        second.to_str().unwrap().to_string(),
    ];
    let outputs = pipeline.process_many(&inputs[..]).await;

    let docs: Vec<&str> = outputs.iter().map(|o| o.metadata.document.as_str()).collect();
    assert_eq!(docs, vec!["report", "missing", "appendix"]);
    assert!(outputs[0].is_success() && outputs[2].is_success());
    assert!(!outputs[1].is_success());
}

#[tokio::test]
async fn progress_sees_every_batch() {
    let fx = Fixture::new();
    let progress = Arc::new(CountingProgress::default());
    let pipeline = Pipeline::new(
        fx.config(2, 2),
        FakeRasterizer::new(5),
        Arc::new(FakeExtractor::default()),
    )
    .unwrap()
    .with_progress(progress.clone());

    pipeline.process(fx.input()).await;
    assert_eq!(progress.started.load(Ordering::SeqCst), 3);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_request_returns_every_permit() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor {
        delay: Some(|_| Duration::from_secs(30)),
        ..Default::default()
    });
    let pipeline =
        Pipeline::new(fx.config(1, 2), FakeRasterizer::new(4), extractor.clone()).unwrap();

    let res = tokio::time::timeout(Duration::from_millis(100), pipeline.process(fx.input())).await;
    assert!(res.is_err());

    for _ in 0..100 {
        if pipeline.limiter().available() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pipeline.limiter().available(), 2);
}

#[tokio::test]
#[should_panic(expected = "extractor exploded")]
async fn batch_panic_reaches_the_caller() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor {
        panic_page: Some(1),
        ..Default::default()
    });
    let pipeline = Pipeline::new(fx.config(1, 1), FakeRasterizer::new(1), extractor).unwrap();
    pipeline.process(fx.input()).await;
}

#[tokio::test]
async fn similar_names_do_not_share_cache_entries() {
    let fx = Fixture::new();
    let spaced = fx.dir.path().join("Q3 report.pdf");
    let underscored = fx.dir.path().join("Q3_report.pdf");
    for path in [&spaced, &underscored] {
        std::fs::write(path, b"%PDF-1.7 fake").unwrap();
    }

    let first_extractor = Arc::new(FakeExtractor::default());
    let first = Pipeline::new(fx.config(1, 2), FakeRasterizer::new(2), first_extractor.clone())
        .unwrap()
        .process(spaced.to_str().unwrap())
        .await;
    assert!(first.is_success(), "{:?}", first.errors);
    assert_eq!(first_extractor.calls(), 2);

    let second_extractor = Arc::new(FakeExtractor::default());
    let second = Pipeline::new(fx.config(1, 2), FakeRasterizer::new(2), second_extractor.clone())
        .unwrap()
        .process(underscored.to_str().unwrap())
        .await;
    assert!(second.is_success(), "{:?}", second.errors);
    assert_eq!(second.stats.cached_units, 0);
    assert_eq!(second_extractor.calls(), 2);
}

#[tokio::test]
async fn very_long_file_name_is_cached() {
    let fx = Fixture::new();
    let document = fx.dir.path().join(format!("{}.pdf", "r".repeat(240)));
    std::fs::write(&document, b"%PDF-1.7 fake").unwrap();

    let extractor = Arc::new(FakeExtractor::default());
    let pipeline =
        Pipeline::new(fx.config(1, 2), FakeRasterizer::new(2), extractor.clone()).unwrap();

    let first = pipeline.process(document.to_str().unwrap()).await;
    assert!(first.is_success(), "{:?}", first.errors);
    assert_eq!(first.content, expected(1..=2));

    let second = pipeline.process(document.to_str().unwrap()).await;
    assert_eq!(second.stats.cached_units, 2);
    assert_eq!(extractor.calls(), 2);
}
