//! # taxreturn-core
//!
//! Extract U.S. tax information documents (W-2, 1099-INT, 1099-NEC) into
//! canonical records, aggregate them, and compute a simplified federal
//! return for a supported tax year.
//!
//! ## Pipeline Overview
//!
//! ```text
//! documents
//!  │
//!  ├─ 1. Input      text files or JSON manifests → DocumentInput
//!  ├─ 2. Extract    text layer → label/box parser
//!  │                no text layer → LLM fallback (timeout + retry) → JSON validation
//!  ├─ 3. Aggregate  totals, missing fields, withholding conflicts, warnings
//!  ├─ 4. Compute    standard deduction, progressive brackets, refund or amount due
//!  └─ 5. Summary    Form 1040 line items for an external renderer
//! ```
//!
//! Documents are extracted concurrently. A document that fails is reported
//! on the return, never silently dropped; the run only fails when no
//! document could be extracted at all.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taxreturn_core::{file_return, DocumentInput, FilingStatus, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let w2 = std::fs::read_to_string("w2.txt")?;
//!     let inputs = vec![DocumentInput::from_text("w2.txt", w2)];
//!     let config = PipelineConfig::default();
//!     let output = file_return(&inputs, FilingStatus::Single, &config).await?;
//!     println!("{}", output.summary);
//!     Ok(())
//! }
//! ```
//!
//! The pure stages can also be used on their own:
//!
//! ```rust
//! use taxreturn_core::{aggregate, compute, extract, AggregationOptions, ExtractionSource, FilingStatus};
//!
//! let text = "Form W-2 Wage and Tax Statement 2024\n\
//!             1 Wages, tips, other compensation 50,000.00 \
//!             2 Federal income tax withheld 6,000.00";
//! let doc = extract(text, ExtractionSource::TextLayer, None).unwrap();
//! let agg = aggregate(&[doc], FilingStatus::Single, &AggregationOptions::default());
//! let tax = compute(&agg).unwrap();
//! assert_eq!(tax.refund_or_due.to_string(), "1984.00");
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `taxreturn` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! taxreturn-core = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod aggregate;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;
pub mod stream;
pub mod summary;
pub mod tables;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use aggregate::{
    aggregate, aggregate_batch, AggregateReturn, AggregationOptions, MissingField, MissingReason,
    Totals, Warning,
};
pub use batch::{
    extract_batch, file_return, file_return_from_paths, file_return_sync, file_return_to_file,
    prepare_return,
};
pub use config::{PipelineConfig, PipelineConfigBuilder, MAX_RETRIES};
pub use engine::{compute, Assumption, TaxResult};
pub use error::{DocumentError, ExtractionError, InferenceError, TaxError};
pub use output::{BatchOutcome, BatchStats, DocumentOutcome, ReturnOutput};
pub use pipeline::extract::extract;
pub use pipeline::input::{load_inputs, DocumentInput, PageImage, PageText};
pub use pipeline::llm::{FallbackInference, LlmFallback};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{
    Amount, CanonicalDocument, DocumentKind, ExtractionSource, Field, FilingStatus,
    StatementFields, MAX_BOX_AMOUNT, SUPPORTED_TAX_YEAR,
};
pub use stream::{extract_stream, extract_stream_ordered, DocumentStream};
pub use summary::{LineItem, Outcome, ReturnSummary};
pub use tables::StatutoryTable;
