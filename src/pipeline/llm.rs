//! Fallback inference: the capability boundary for scanned documents.
//!
//! When a document has no usable text layer, something outside this crate
//! has to look at it and say what the boxes contain. [`FallbackInference`]
//! is that "something": a backend returning best-effort JSON for one
//! document. The crate ships an LLM-backed implementation
//! ([`LlmFallback`]); tests and human-in-the-loop review plug in their own.
//!
//! This module owns only the call policy, not the answer: every call runs
//! under a timeout and a bounded retry budget, and whatever comes back is
//! re-validated by [`crate::pipeline::fallback`].
//!
//! ## Retry Strategy
//!
//! Exponential backoff (`retry_backoff_ms * 2^attempt`, saturating). With
//! the defaults (500 ms base, one retry) a failing document costs at most
//! two calls and half a second of back-off. Permanent errors are not
//! retried, and no run retries more than [`MAX_RETRIES`] times.

use crate::config::{PipelineConfig, MAX_RETRIES};
use crate::error::{DocumentError, InferenceError, TaxError};
use crate::pipeline::input::DocumentInput;
use crate::prompts::{structuring_request, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A backend that reads a scanned document and returns JSON text.
#[async_trait]
pub trait FallbackInference: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Return the backend's reply for one document. The reply should hold a
    /// JSON object; surrounding prose is tolerated.
    async fn infer(&self, input: &DocumentInput) -> Result<String, InferenceError>;
}

// ── LLM backend ──────────────────────────────────────────────────────────────

/// Fallback backed by an `edgequake-llm` chat provider.
///
/// ## Message Layout
///
/// 1. **System message**: the structuring prompt (or user-supplied override)
/// 2. **User message**: document name, declared kind, any partial text, and
///    the page images when the ingestion side supplied them
pub struct LlmFallback {
    name: String,
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
}

impl LlmFallback {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            name: config
                .provider_name
                .clone()
                .unwrap_or_else(|| "llm".to_string()),
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
        }
    }
}

#[async_trait]
impl FallbackInference for LlmFallback {
    fn name(&self) -> &str {
        &self.name
    }

    async fn infer(&self, input: &DocumentInput) -> Result<String, InferenceError> {
        let images: Vec<ImageData> = input
            .images()
            .map(|img| ImageData::new(img.data.clone(), img.mime_type.clone()).with_detail("high"))
            .collect();
        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user_with_images(structuring_request(input), images),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| classify(&e.to_string()))?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            input.name, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Authentication and request-shape failures will not succeed on retry.
fn classify(message: &str) -> InferenceError {
    let lower = message.to_ascii_lowercase();
    let permanent = ["401", "403", "unauthorized", "invalid api key", "authentication"]
        .iter()
        .any(|needle| lower.contains(needle));
    if permanent {
        InferenceError::Permanent(message.to_string())
    } else {
        InferenceError::Transient(message.to_string())
    }
}

// ── Call policy ──────────────────────────────────────────────────────────────

/// Outcome of [`infer_with_retry`]: the reply (or final error) and how many
/// retries it took.
#[derive(Debug)]
pub struct InferenceAttempts {
    pub reply: Result<String, DocumentError>,
    pub retries: u32,
    pub duration_ms: u64,
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(factor)
}

/// Call `backend` under the configured timeout, retrying transient failures.
pub async fn infer_with_retry(
    backend: &dyn FallbackInference,
    input: &DocumentInput,
    config: &PipelineConfig,
) -> InferenceAttempts {
    let start = Instant::now();
    let per_call = Duration::from_secs(config.fallback_timeout_secs);
    let max_retries = config.max_retries.min(MAX_RETRIES);
    let mut last_err: Option<DocumentError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "{}: fallback retry {}/{} after {}ms",
                input.name, attempt, max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(per_call, backend.infer(input)).await {
            Ok(Ok(reply)) => {
                return InferenceAttempts {
                    reply: Ok(reply),
                    retries: attempt,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
            Ok(Err(InferenceError::Permanent(detail))) => {
                warn!("{}: fallback failed permanently: {}", input.name, detail);
                return InferenceAttempts {
                    reply: Err(DocumentError::FallbackFailed {
                        document: input.name.clone(),
                        retries: attempt,
                        detail,
                    }),
                    retries: attempt,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
            Ok(Err(e)) => {
                warn!("{}: attempt {} failed: {}", input.name, attempt + 1, e);
                last_err = Some(DocumentError::FallbackFailed {
                    document: input.name.clone(),
                    retries: max_retries,
                    detail: e.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    "{}: attempt {} timed out after {}s",
                    input.name,
                    attempt + 1,
                    config.fallback_timeout_secs
                );
                last_err = Some(DocumentError::FallbackTimeout {
                    document: input.name.clone(),
                    timeout_ms: config.fallback_timeout_ms(),
                });
            }
        }
    }

    InferenceAttempts {
        reply: Err(last_err.unwrap_or_else(|| DocumentError::FallbackFailed {
            document: input.name.clone(),
            retries: max_retries,
            detail: "Unknown error".to_string(),
        })),
        retries: max_retries,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

// ── Backend resolution ───────────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, TaxError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        TaxError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Resolve the fallback backend, from most-specific to least-specific.
///
/// 1. **Pre-built backend** (`config.fallback`), used as-is.
/// 2. **Pre-built provider** (`config.provider`), wrapped in [`LlmFallback`].
/// 3. **Named provider + model** (`config.provider_name`).
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 5. **OpenAI** when `OPENAI_API_KEY` is set.
/// 6. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// Callers treat an error as "no fallback available": text-layer documents
/// are unaffected, scanned ones fail with
/// [`DocumentError::FallbackUnavailable`].
pub fn resolve_fallback(config: &PipelineConfig) -> Result<Arc<dyn FallbackInference>, TaxError> {
    if let Some(ref backend) = config.fallback {
        return Ok(Arc::clone(backend));
    }

    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmFallback::new(provider, config)))
}

fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, TaxError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| TaxError::ProviderNotConfigured {
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
