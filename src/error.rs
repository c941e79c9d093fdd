//! Error types for the taxreturn-core library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`TaxError`] — **Fatal**: the return cannot be computed at all
//!   (negative totals, no statutory table for the year, every document
//!   failed). Returned as `Err(TaxError)` from the top-level `file_return*`
//!   functions and from [`crate::engine::compute`].
//!
//! * [`DocumentError`] — **Non-fatal**: a single document failed (unknown
//!   form, garbage input, fallback inference gave up) but its siblings are
//!   fine. Stored inside [`crate::output::DocumentOutcome`] and carried into
//!   the summary so the filer learns which upload needs attention.
//!
//! * [`ExtractionError`] — what the pure extractor returns. It knows nothing
//!   about file names; the batch driver attaches the document name via
//!   [`ExtractionError::for_document`].
//!
//! Individual unresolved fields are not errors at all: they become
//! [`crate::schema::Amount::Unknown`] and surface as warnings.

use rust_decimal::Decimal;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the taxreturn-core library.
///
/// Document-level failures use [`DocumentError`] and are stored in
/// [`crate::output::DocumentOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum TaxError {
    // ── Calculation preconditions ─────────────────────────────────────────
    /// An aggregate total is negative; statutory arithmetic is undefined.
    #[error("Aggregate total '{field}' is negative ({amount}); cannot compute tax")]
    NegativeTotal { field: &'static str, amount: Decimal },

    /// A total or intermediate amount does not fit in a `Decimal`.
    #[error("Amount '{field}' is out of range; cannot compute tax")]
    TotalOutOfRange { field: &'static str },

    /// No statutory table exists for the requested tax year.
    #[error("No statutory table for tax year {year} (supported: {supported})")]
    UnsupportedTaxYear { year: i32, supported: i32 },

    /// Filing status string did not name a known status.
    #[error(
        "Unknown filing status '{input}'\n\
Expected one of: single, married_filing_jointly, married_filing_separately, head_of_household"
    )]
    UnknownFilingStatus { input: String },

    /// Every document in the batch failed; there is nothing to compute on.
    #[error("All {failed} documents failed extraction.\nFirst error: {first_error}")]
    NoDocuments { failed: usize, first_error: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A document file could not be read.
    #[error("Failed to read document '{path}': {source}")]
    InputRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The return output could not be written.
    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON ingestion manifest was not valid.
    #[error("Invalid ingestion manifest '{path}': {detail}")]
    InvalidManifest { path: PathBuf, detail: String },

    // ── Fallback provider errors ──────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of the pure extractor for one input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    /// No supported document kind could be determined with enough confidence.
    #[error("unrecognized document: {detail}")]
    UnrecognizedDocument { detail: String },

    /// Input was empty, not text, or not the expected JSON object.
    #[error("malformed input: {reason}")]
    MalformedInput { reason: String },
}

impl ExtractionError {
    /// Attach the document name, turning this into a reportable [`DocumentError`].
    pub fn for_document(self, document: impl Into<String>) -> DocumentError {
        let document = document.into();
        match self {
            ExtractionError::UnrecognizedDocument { detail } => {
                DocumentError::UnrecognizedDocument { document, detail }
            }
            ExtractionError::MalformedInput { reason } => {
                DocumentError::MalformedInput { document, reason }
            }
        }
    }
}

/// A non-fatal error for a single document.
///
/// The overall batch continues unless ALL documents fail.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// Document kind could not be determined.
    #[error("{document}: unrecognized document ({detail})")]
    UnrecognizedDocument { document: String, detail: String },

    /// Document text was empty or garbage.
    #[error("{document}: malformed input ({reason})")]
    MalformedInput { document: String, reason: String },

    /// Fallback inference failed after retries.
    #[error("{document}: fallback inference failed after {retries} retries: {detail}")]
    FallbackFailed {
        document: String,
        retries: u32,
        detail: String,
    },

    /// Fallback inference timed out on the last attempt.
    #[error("{document}: fallback inference timed out after {timeout_ms}ms")]
    FallbackTimeout { document: String, timeout_ms: u64 },

    /// Text layer unusable and no fallback backend could be resolved.
    #[error("{document}: text layer unusable and no fallback inference is configured ({hint})")]
    FallbackUnavailable { document: String, hint: String },
}

impl DocumentError {
    /// Name of the document this error belongs to.
    pub fn document(&self) -> &str {
        match self {
            DocumentError::UnrecognizedDocument { document, .. }
            | DocumentError::MalformedInput { document, .. }
            | DocumentError::FallbackFailed { document, .. }
            | DocumentError::FallbackTimeout { document, .. }
            | DocumentError::FallbackUnavailable { document, .. } => document,
        }
    }
}

/// Error returned by a [`crate::pipeline::llm::FallbackInference`] backend.
///
/// Only transient errors are retried; a permanent error (bad API key,
/// rejected request) fails the document immediately.
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("transient inference error: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}
