//! Field extractor entry point.
//!
//! Pure: no I/O, no shared state. Safe to run on many documents at once.

use crate::error::ExtractionError;
use crate::pipeline::fallback::extract_inferred;
use crate::pipeline::normalize::{clean_text, is_garbage};
use crate::pipeline::text::extract_text_layer;
use crate::schema::{CanonicalDocument, DocumentKind, ExtractionSource};
use tracing::debug;

/// Turn raw document content into a [`CanonicalDocument`].
///
/// * `TextLayer`: `raw_text` is the document's own text layer.
/// * `InferredFallback`: `raw_text` is the fallback backend's reply, a JSON
///   object possibly wrapped in prose or code fences.
///
/// `declared_kind_hint` is a loose form name from the ingestion side
/// ("W-2", "1099-int", …); unrecognised hints are ignored.
pub fn extract(
    raw_text: &str,
    source: ExtractionSource,
    declared_kind_hint: Option<&str>,
) -> Result<CanonicalDocument, ExtractionError> {
    let text = clean_text(raw_text);
    if text.is_empty() {
        return Err(ExtractionError::MalformedInput {
            reason: "input is empty".into(),
        });
    }
    if is_garbage(&text) {
        return Err(ExtractionError::MalformedInput {
            reason: "input has no readable text".into(),
        });
    }

    let hint = declared_kind_hint.and_then(|h| {
        let kind = DocumentKind::from_hint(h);
        if kind.is_none() {
            debug!("Ignoring unrecognised kind hint '{}'", h);
        }
        kind
    });

    let doc = match source {
        ExtractionSource::TextLayer => extract_text_layer(&text, hint)?,
        ExtractionSource::InferredFallback => extract_inferred(&text, hint)?,
    };

    debug!(
        "Extracted {} via {:?}: {} unknown field(s)",
        doc.kind(),
        source,
        doc.unknown_fields().len()
    );
    Ok(doc)
}
