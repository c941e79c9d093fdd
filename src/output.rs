//! Output types for batch extraction and filing.

use crate::error::DocumentError;
use crate::schema::{CanonicalDocument, ExtractionSource};
use crate::engine::TaxResult;
use crate::summary::ReturnSummary;
use serde::{Deserialize, Serialize};

/// Result of extracting one uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    /// Position in upload order (0-indexed).
    pub index: usize,
    pub name: String,
    /// Route the document took: own text layer or fallback inference.
    pub source: ExtractionSource,
    pub result: Result<CanonicalDocument, DocumentError>,
    /// Fallback retries used (0 for text-layer documents).
    pub retries: u32,
    pub duration_ms: u64,
}

impl DocumentOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Every document outcome of a batch, in upload order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub outcomes: Vec<DocumentOutcome>,
    pub stats: BatchStats,
}

impl BatchOutcome {
    /// Successfully extracted documents, in upload order.
    pub fn documents(&self) -> Vec<CanonicalDocument> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().cloned())
            .collect()
    }

    /// Per-document failures, in upload order.
    pub fn failures(&self) -> Vec<DocumentError> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().cloned())
            .collect()
    }
}

/// Statistics about one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_documents: usize,
    pub extracted_documents: usize,
    pub failed_documents: usize,
    /// Documents routed through fallback inference.
    pub fallback_documents: usize,
    pub total_retries: u32,
    pub total_duration_ms: u64,
}

/// Everything produced by [`crate::batch::file_return`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnOutput {
    pub summary: ReturnSummary,
    pub tax_result: TaxResult,
    pub documents: Vec<DocumentOutcome>,
    pub stats: BatchStats,
}
