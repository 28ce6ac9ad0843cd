//! Extraction service client: page image(s) + prompt → extracted text.
//!
//! The pipeline talks to the service through the [`Extractor`] trait only.
//! [`VisionExtractor`] is the production adapter over an `edgequake_llm`
//! vision provider.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. The client retries with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`): with 500 ms base and 3 retries the
//! waits are 500 ms → 1 s → 2 s. The pipeline itself never retries.

use crate::error::{ExtractionError, PipelineError};
use crate::pipeline::encode::{encode_image, encode_images};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// What a batch-mode call returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchExtraction {
    /// One string covering every image of the call.
    Combined(String),
    /// One string per image, in request order.
    PerUnit(Vec<String>),
}

/// A slow, fallible extraction service.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract one page.
    async fn extract_single(
        &self,
        image: &DynamicImage,
        prompt: &str,
    ) -> Result<String, ExtractionError>;

    /// Extract several pages in one call.
    async fn extract_batch(
        &self,
        images: &[&DynamicImage],
        prompt: &str,
    ) -> Result<BatchExtraction, ExtractionError>;
}

/// Model and retry settings for [`VisionExtractor`].
#[derive(Debug, Clone)]
pub struct VisionOptions {
    /// Provider name (`"openai"`, `"anthropic"`, ...). `None` → auto-detect.
    pub provider_name: Option<String>,
    /// Model identifier. `None` → provider default.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for VisionOptions {
    fn default() -> Self {
        Self {
            provider_name: None,
            model: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Default model when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Vision-LLM backed [`Extractor`].
pub struct VisionExtractor {
    provider: Arc<dyn LLMProvider>,
    options: VisionOptions,
}

impl std::fmt::Debug for VisionExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionExtractor")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl VisionExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, options: VisionOptions) -> Self {
        Self { provider, options }
    }

    /// Resolve a provider from `options` and the environment, then wrap it.
    pub fn from_options(options: VisionOptions) -> Result<Self, PipelineError> {
        let provider = resolve_provider(&options)?;
        Ok(Self::new(provider, options))
    }

    pub fn options(&self) -> &VisionOptions {
        &self.options
    }

    async fn call(&self, prompt: &str, images: Vec<ImageData>) -> Result<String, ExtractionError> {
        let messages = vec![
            ChatMessage::system(prompt),
            ChatMessage::user_with_images("", images),
        ];
        let options = build_options(&self.options);
        let start = Instant::now();

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay(self.options.retry_backoff_ms, attempt);
                warn!(
                    "Extraction retry {}/{} after {}ms",
                    attempt,
                    self.options.max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "{} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    let content = strip_markdown_fences(&response.content);
                    if content.trim().is_empty() {
                        return Err(ExtractionError::EmptyResponse);
                    }
                    return Ok(content);
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("Extraction attempt {} failed — {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(ExtractionError::ServiceFailed {
            retries: self.options.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

#[async_trait]
impl Extractor for VisionExtractor {
    async fn extract_single(
        &self,
        image: &DynamicImage,
        prompt: &str,
    ) -> Result<String, ExtractionError> {
        let image = image.clone();
        let encoded = tokio::task::spawn_blocking(move || encode_image(&image))
            .await
            .map_err(|e| ExtractionError::Encode(e.to_string()))??;
        self.call(prompt, vec![encoded]).await
    }

    async fn extract_batch(
        &self,
        images: &[&DynamicImage],
        prompt: &str,
    ) -> Result<BatchExtraction, ExtractionError> {
        let encoded = encode_images(images).await?;
        debug!("Batch call with {} images", encoded.len());
        self.call(prompt, encoded).await.map(BatchExtraction::Combined)
    }
}

/// Build `CompletionOptions` from the extractor options.
fn build_options(options: &VisionOptions) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(options.temperature),
        max_tokens: Some(options.max_tokens),
        ..Default::default()
    }
}

/// Wait before retry number `attempt` (1-based).
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))))
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md|json)?\n(.*)\n```\s*$").unwrap());

/// Models sometimes wrap the whole answer in a fence despite the prompt.
fn strip_markdown_fences(input: &str) -> String {
    let input = input.replace("\r\n", "\n");
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Named provider** (`options.provider_name`) with `options.model` or
///    [`DEFAULT_MODEL`].
/// 2. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 3. **OpenAI** when `OPENAI_API_KEY` is set.
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(options: &VisionOptions) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref name) = options.provider_name {
        let model = options.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = options.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
