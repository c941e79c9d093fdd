//! Configuration for extraction, aggregation and fallback inference.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Filing status is deliberately absent: it is a
//! required argument of [`crate::batch::file_return`], never a default.

use crate::error::TaxError;
use crate::pipeline::llm::FallbackInference;
use crate::progress::ProgressCallback;
use crate::schema::SUPPORTED_TAX_YEAR;
use edgequake_llm::LLMProvider;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

/// Upper bound on [`PipelineConfig::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Configuration for one filing run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use taxreturn_core::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .concurrency(4)
///     .confidence_threshold(0.75)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Number of documents extracted at once. Default: 8.
    ///
    /// Text-layer documents are CPU-cheap; the bound matters for scanned
    /// documents, each of which costs one fallback inference call.
    pub concurrency: usize,

    /// Tax year the return is filed for. Default: 2024 (the only year with a
    /// statutory table).
    pub tax_year: i32,

    /// Minimum field confidence for a value to count toward totals.
    /// Default: None (every known value counts).
    ///
    /// The comparison is strict: a field contributes iff its confidence is
    /// greater than the threshold.
    pub confidence_threshold: Option<f64>,

    /// Withholding difference tolerated between two documents from the same
    /// payer before a conflict warning is raised. Default: $1.00.
    pub conflict_tolerance: Decimal,

    /// Per-call timeout for fallback inference in seconds. Default: 60.
    pub fallback_timeout_secs: u64,

    /// Retries after a failed or timed-out fallback call. Default: 1.
    /// At most [`MAX_RETRIES`].
    ///
    /// Permanent errors (bad API key, rejected request) are not retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Pre-constructed fallback backend. Takes precedence over every LLM
    /// setting below.
    pub fallback: Option<Arc<dyn FallbackInference>>,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the structuring call. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the structuring call may generate. Default: 1024.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Per-document progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            tax_year: SUPPORTED_TAX_YEAR,
            confidence_threshold: None,
            conflict_tolerance: Decimal::ONE,
            fallback_timeout_secs: 60,
            max_retries: 1,
            retry_backoff_ms: 500,
            fallback: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 1024,
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("concurrency", &self.concurrency)
            .field("tax_year", &self.tax_year)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("conflict_tolerance", &self.conflict_tolerance)
            .field("fallback_timeout_secs", &self.fallback_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("fallback", &self.fallback.as_ref().map(|b| b.name().to_string()))
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Fallback timeout in milliseconds, as reported in errors.
    pub fn fallback_timeout_ms(&self) -> u64 {
        self.fallback_timeout_secs.saturating_mul(1000)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn tax_year(mut self, year: i32) -> Self {
        self.config.tax_year = year;
        self
    }

    pub fn confidence_threshold(mut self, threshold: f64) -> Self {
        self.config.confidence_threshold = Some(threshold);
        self
    }

    pub fn conflict_tolerance(mut self, tolerance: Decimal) -> Self {
        self.config.conflict_tolerance = tolerance.max(Decimal::ZERO);
        self
    }

    pub fn fallback_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fallback_timeout_secs = secs.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn fallback(mut self, backend: Arc<dyn FallbackInference>) -> Self {
        self.config.fallback = Some(backend);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, TaxError> {
        let c = &self.config;
        if c.tax_year != SUPPORTED_TAX_YEAR {
            return Err(TaxError::UnsupportedTaxYear {
                year: c.tax_year,
                supported: SUPPORTED_TAX_YEAR,
            });
        }
        if let Some(t) = c.confidence_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(TaxError::InvalidConfig(format!(
                    "Confidence threshold must be 0.0–1.0, got {}",
                    t
                )));
            }
        }
        if c.concurrency == 0 {
            return Err(TaxError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}
