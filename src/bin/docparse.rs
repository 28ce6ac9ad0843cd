//! CLI binary for edgequake-docparse.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_docparse::{
    ContentCache, OutputFormat, PageRange, Pipeline, PipelineConfig, PipelineOutput,
    PipelineProgressCallback, ProgressCallback, PromptSource, RasterizerRegistry,
    VisionExtractor, VisionOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress bar over batches. Batches complete out of order, so
/// only counts are shown.
struct CliProgressCallback {
    bar: ProgressBar,
    cached: AtomicUsize,
    extracted: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            cached: AtomicUsize::new(0),
            extracted: AtomicUsize::new(0),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_pipeline_start(&self, total_units: usize, total_batches: usize) {
        self.cached.store(0, Ordering::SeqCst);
        self.extracted.store(0, Ordering::SeqCst);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} batches  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_batches as u64);
        self.bar.set_position(0);
        self.bar.set_prefix("Extracting");
        self.bar.set_message("");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_units} pages in {total_batches} batches…"))
        ));
    }

    fn on_batch_complete(&self, _batch: usize, _total: usize, cached: usize, extracted: usize) {
        let cached = self.cached.fetch_add(cached, Ordering::SeqCst) + cached;
        let extracted = self.extracted.fetch_add(extracted, Ordering::SeqCst) + extracted;
        self.bar
            .set_message(dim(&format!("{cached} cached, {extracted} extracted")));
        self.bar.inc(1);
    }

    fn on_batch_error(&self, batch: usize, total: usize, error: &str) {
        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}",
            red("✗"),
            batch + 1,
            total,
            red(&msg)
        ));
    }

    fn on_pipeline_complete(&self, total_units: usize, success: bool) {
        self.bar.finish_and_clear();
        if success {
            eprintln!(
                "{} {} pages extracted  {}",
                green("✔"),
                bold(&total_units.to_string()),
                dim(&format!(
                    "({} from cache)",
                    self.cached.load(Ordering::SeqCst)
                ))
            );
        } else {
            eprintln!("{} extraction failed", red("✘"));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a document to stdout
  docparse report.pdf

  # Pages 2-3 only, written to a file
  docparse --pages 2-3 report.pdf -o report.md

  # Several documents into a directory, 4 pages per call
  docparse --batch-size 4 a.pdf b.pdf scan.png -o out/

  # JSON output with the bundled "tables" prompt
  docparse --format json --prompt tables report.pdf

  # Cached results expire after one day
  docparse --cache-ttl 86400 report.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         libpdfium file or directory (default: system library)
  RUST_LOG                Log filter, overrides --verbose/--quiet
"#;

/// Extract structured content from documents with a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "docparse",
    version,
    about = "Extract structured content from PDF and image documents using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths (PDF, PNG, JPEG) or HTTP/HTTPS URLs.
    #[arg(required_unless_present = "clear_cache")]
    inputs: Vec<String>,

    /// Output file (one input) or directory (several inputs). Default: stdout.
    #[arg(short, long, env = "DOCPARSE_OUTPUT")]
    output: Option<PathBuf>,

    /// Output format: markdown or json.
    #[arg(long, env = "DOCPARSE_FORMAT", default_value = "markdown")]
    format: OutputFormat,

    /// Bundled prompt template (markdown, json, tables, plain) or literal prompt text.
    #[arg(long, env = "DOCPARSE_PROMPT", conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Read the prompt text from a file.
    #[arg(long, env = "DOCPARSE_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Page range: 5 or 3-15 (1-based, inclusive).
    #[arg(long, env = "DOCPARSE_PAGES")]
    pages: Option<PageRange>,

    /// Pages sent per extraction call.
    #[arg(short, long, env = "DOCPARSE_BATCH_SIZE", default_value_t = 1)]
    batch_size: usize,

    /// Maximum extraction calls in flight.
    #[arg(short, long, env = "DOCPARSE_CONCURRENCY", default_value_t = 15)]
    concurrency: usize,

    /// Do not read or write the page cache.
    #[arg(long, env = "DOCPARSE_NO_CACHE")]
    no_cache: bool,

    /// Page cache directory.
    #[arg(long, env = "DOCPARSE_CACHE_DIR", default_value = "cache")]
    cache_dir: PathBuf,

    /// Cache entry lifetime in seconds (default: never expire).
    #[arg(long, env = "DOCPARSE_CACHE_TTL")]
    cache_ttl: Option<u64>,

    /// Empty the page cache before processing (alone: clear and exit).
    #[arg(long)]
    clear_cache: bool,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "DOCPARSE_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DOCPARSE_PASSWORD")]
    password: Option<String>,

    /// Max LLM output tokens per call.
    #[arg(long, env = "DOCPARSE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOCPARSE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per call on LLM failure.
    #[arg(long, env = "DOCPARSE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call extraction timeout in seconds.
    #[arg(long, env = "DOCPARSE_API_TIMEOUT")]
    api_timeout: Option<u64>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCPARSE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the full result (content, metadata, stats) as JSON.
    #[arg(long, env = "DOCPARSE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCPARSE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCPARSE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCPARSE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar provides the feedback that matters; keep library
    // logs to errors while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Cache maintenance ────────────────────────────────────────────────
    if cli.clear_cache {
        let cache = ContentCache::open(&cli.cache_dir, None)
            .with_context(|| format!("Failed to open cache at {}", cli.cache_dir.display()))?;
        let freed = cache.size_bytes().await.unwrap_or(0);
        cache.clear().await.context("Failed to clear cache")?;
        if !cli.quiet {
            eprintln!(
                "{} cleared {} ({} bytes)",
                green("✔"),
                cli.cache_dir.display(),
                freed
            );
        }
        if cli.inputs.is_empty() {
            return Ok(());
        }
    }

    // ── Build pipeline ───────────────────────────────────────────────────
    let config = build_config(&cli).await?;
    let extractor = VisionExtractor::from_options(VisionOptions {
        provider_name: cli.provider.clone(),
        model: cli.model.clone(),
        temperature: cli.temperature,
        max_tokens: cli.max_tokens,
        max_retries: cli.max_retries,
        ..Default::default()
    })
    .context("Failed to configure the LLM provider")?;

    let mut pipeline =
        Pipeline::with_registry(config, RasterizerRegistry::with_defaults(), Arc::new(extractor))
            .context("Invalid configuration")?;
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        pipeline = pipeline.with_progress(cb);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let outputs = pipeline.process_many(cli.inputs.as_slice()).await;

    let mut failed = 0usize;
    for (input, output) in cli.inputs.iter().zip(&outputs) {
        if !output.is_success() {
            failed += 1;
            eprintln!("{} {}: {}", red("✘"), input, output.errors.join("; "));
            if !cli.json {
                continue;
            }
        }
        emit(&cli, output).await?;
        if !cli.quiet && !show_progress && output.is_success() {
            eprintln!(
                "{} {}  {} pages  {} cached / {} extracted  {}ms",
                green("✔"),
                output.metadata.document,
                output.metadata.unit_count,
                output.stats.cached_units,
                output.stats.extracted_units,
                output.stats.total_duration_ms
            );
        }
    }

    if failed > 0 {
        bail!("{failed} of {} documents failed", outputs.len());
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let prompt = if let Some(ref path) = cli.prompt_file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        PromptSource::Custom(text)
    } else if let Some(ref p) = cli.prompt {
        PromptSource::from_name_or_text(p.clone())
    } else {
        PromptSource::Default
    };

    let mut builder = PipelineConfig::builder()
        .batch_size(cli.batch_size)
        .max_concurrent(cli.concurrency)
        .output_format(cli.format)
        .prompt(prompt)
        .use_cache(!cli.no_cache)
        .cache_dir(&cli.cache_dir)
        .dpi(cli.dpi)
        .download_timeout_secs(cli.download_timeout);

    if let Some(range) = cli.pages {
        builder = builder.page_range(range);
    }
    if let Some(ttl) = cli.cache_ttl {
        builder = builder.cache_ttl(Duration::from_secs(ttl));
    }
    if let Some(secs) = cli.api_timeout {
        builder = builder.extraction_timeout_secs(secs);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }

    builder.build().context("Invalid configuration")
}

/// Print or write one document's result.
async fn emit(cli: &Cli, output: &PipelineOutput) -> Result<()> {
    let body = if cli.json {
        serde_json::to_string_pretty(output).context("Failed to serialise output")?
    } else {
        output.content.clone()
    };

    match &cli.output {
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(body.as_bytes())
                .context("Failed to write to stdout")?;
            if !body.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            Ok(())
        }
        Some(target) => {
            let path = if cli.inputs.len() > 1 || target.is_dir() {
                target.join(format!(
                    "{}.{}",
                    output.metadata.document,
                    extension(cli)
                ))
            } else {
                target.clone()
            };
            write_atomic(&path, &body).await?;
            if !cli.quiet {
                eprintln!("   → {}", bold(&path.display().to_string()));
            }
            Ok(())
        }
    }
}

fn extension(cli: &Cli) -> &'static str {
    match (cli.json, cli.format) {
        (true, _) | (false, OutputFormat::Json) => "json",
        (false, OutputFormat::Markdown) => "md",
    }
}

/// Write via a `.tmp` sibling and rename, creating parent directories.
async fn write_atomic(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move output to {}", path.display()))?;
    Ok(())
}
