//! Batch extraction and end-to-end filing entry points.
//!
//! Documents are independent, so they are extracted concurrently under a
//! bounded pool (`buffer_unordered(concurrency)`) and re-sorted into upload
//! order afterwards. A failing document never aborts its siblings: its error
//! is kept in its [`DocumentOutcome`] and surfaced on the return. Only when
//! *every* document fails is the run fatal ([`TaxError::NoDocuments`]).
//!
//! Aggregation and calculation run synchronously once all outcomes are in.
//! Use [`crate::stream::extract_stream`] to observe outcomes as they complete.

use crate::aggregate::{aggregate_batch, AggregateReturn, AggregationOptions};
use crate::config::PipelineConfig;
use crate::error::{DocumentError, TaxError};
use crate::output::{BatchOutcome, BatchStats, DocumentOutcome, ReturnOutput};
use crate::pipeline::extract::extract;
use crate::pipeline::input::{load_inputs, DocumentInput};
use crate::pipeline::llm::{infer_with_retry, resolve_fallback, FallbackInference};
use crate::schema::{ExtractionSource, FilingStatus};
use crate::summary;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fallback backend for a batch, resolved at most once.
pub(crate) enum Fallback {
    Ready(Arc<dyn FallbackInference>),
    Unavailable(String),
    /// No document in the batch needs one.
    NotNeeded,
}

impl Fallback {
    /// Resolve only when some input has no usable text layer.
    pub(crate) fn for_inputs(inputs: &[DocumentInput], config: &PipelineConfig) -> Self {
        let needed = inputs
            .iter()
            .filter(|i| i.extraction_source() == ExtractionSource::InferredFallback)
            .count();
        if needed == 0 {
            return Fallback::NotNeeded;
        }
        match resolve_fallback(config) {
            Ok(backend) => {
                info!(
                    "{} document(s) need fallback inference via '{}'",
                    needed,
                    backend.name()
                );
                Fallback::Ready(backend)
            }
            Err(e) => {
                warn!(
                    "{} document(s) need fallback inference but none is available: {}",
                    needed, e
                );
                Fallback::Unavailable(e.to_string())
            }
        }
    }
}

/// Extract one document: text layer directly, otherwise via fallback inference.
pub(crate) async fn extract_one(
    index: usize,
    total: usize,
    input: &DocumentInput,
    fallback: &Fallback,
    config: &PipelineConfig,
) -> DocumentOutcome {
    let start = Instant::now();
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(index, total, &input.name);
    }

    let source = input.extraction_source();
    let hint = input.kind_hint.as_deref();
    let (result, retries) = match (source, fallback) {
        (ExtractionSource::TextLayer, _) => (
            extract(&input.text(), source, hint).map_err(|e| e.for_document(&input.name)),
            0,
        ),
        (ExtractionSource::InferredFallback, Fallback::Ready(backend)) => {
            let attempts = infer_with_retry(backend.as_ref(), input, config).await;
            let result = attempts.reply.and_then(|reply| {
                extract(&reply, source, hint).map_err(|e| e.for_document(&input.name))
            });
            (result, attempts.retries)
        }
        (ExtractionSource::InferredFallback, Fallback::Unavailable(reason)) => (
            Err(DocumentError::FallbackUnavailable {
                document: input.name.clone(),
                hint: reason.clone(),
            }),
            0,
        ),
        (ExtractionSource::InferredFallback, Fallback::NotNeeded) => (
            Err(DocumentError::FallbackUnavailable {
                document: input.name.clone(),
                hint: "fallback inference was not resolved for this batch".into(),
            }),
            0,
        ),
    };
    let result = result.map(|doc| doc.named(&input.name));

    if let Some(ref cb) = config.progress_callback {
        match &result {
            Ok(_) => cb.on_document_complete(index, total, &input.name),
            Err(e) => cb.on_document_error(index, total, &e.to_string()),
        }
    }
    match &result {
        Ok(doc) => debug!("{}: extracted {}", input.name, doc.kind()),
        Err(e) => warn!("{}", e),
    }

    DocumentOutcome {
        index,
        name: input.name.clone(),
        source,
        result,
        retries,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

pub(crate) fn batch_stats(outcomes: &[DocumentOutcome], total_duration_ms: u64) -> BatchStats {
    BatchStats {
        total_documents: outcomes.len(),
        extracted_documents: outcomes.iter().filter(|o| o.is_ok()).count(),
        failed_documents: outcomes.iter().filter(|o| !o.is_ok()).count(),
        fallback_documents: outcomes
            .iter()
            .filter(|o| o.source == ExtractionSource::InferredFallback)
            .count(),
        total_retries: outcomes.iter().map(|o| o.retries).sum(),
        total_duration_ms,
    }
}

/// Extract every document, concurrently, returning outcomes in upload order.
pub async fn extract_batch(inputs: &[DocumentInput], config: &PipelineConfig) -> BatchOutcome {
    let start = Instant::now();
    let total = inputs.len();
    info!("Extracting {} document(s), concurrency {}", total, config.concurrency);

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let fallback = Fallback::for_inputs(inputs, config);
    let fallback = &fallback;
    let mut outcomes: Vec<DocumentOutcome> = stream::iter(
        inputs
            .iter()
            .enumerate()
            .map(|(index, input)| extract_one(index, total, input, fallback, config)),
    )
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    outcomes.sort_by_key(|o| o.index);
    let stats = batch_stats(&outcomes, start.elapsed().as_millis() as u64);

    info!(
        "Extraction complete: {}/{} documents, {}ms",
        stats.extracted_documents, stats.total_documents, stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, stats.extracted_documents);
    }

    BatchOutcome { outcomes, stats }
}

/// Aggregate a finished batch.
///
/// # Errors
/// [`TaxError::NoDocuments`] when nothing was extracted.
pub fn prepare_return(
    batch: &BatchOutcome,
    filing_status: FilingStatus,
    config: &PipelineConfig,
) -> Result<AggregateReturn, TaxError> {
    let documents = batch.documents();
    let failures = batch.failures();
    if documents.is_empty() {
        let first_error = failures
            .first()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no documents were supplied".to_string());
        return Err(TaxError::NoDocuments {
            failed: failures.len(),
            first_error,
        });
    }
    Ok(aggregate_batch(
        &documents,
        &failures,
        filing_status,
        &AggregationOptions::from(config),
    ))
}

/// Extract, aggregate, compute and summarise a return.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(ReturnOutput)` even if some documents failed; their errors appear in
/// `summary.failed_documents` and as warnings.
///
/// # Errors
/// Returns `Err(TaxError)` only for fatal errors:
/// - every document failed extraction
/// - a negative aggregate total or unsupported tax year
pub async fn file_return(
    inputs: &[DocumentInput],
    filing_status: FilingStatus,
    config: &PipelineConfig,
) -> Result<ReturnOutput, TaxError> {
    let batch = extract_batch(inputs, config).await;
    let aggregate = prepare_return(&batch, filing_status, config)?;
    let tax_result = aggregate.tax_result()?.clone();
    let summary = summary::build(&aggregate, &tax_result);

    info!(
        "{} return for {}: {}",
        filing_status, aggregate.tax_year(), summary.outcome
    );

    Ok(ReturnOutput {
        summary,
        tax_result,
        documents: batch.outcomes,
        stats: batch.stats,
    })
}

/// Load documents from disk (see [`load_inputs`]) and file a return.
pub async fn file_return_from_paths(
    paths: &[PathBuf],
    filing_status: FilingStatus,
    config: &PipelineConfig,
) -> Result<ReturnOutput, TaxError> {
    let inputs = load_inputs(paths).await?;
    file_return(&inputs, filing_status, config).await
}

/// File a return and write the JSON [`ReturnOutput`] for the external renderer.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn file_return_to_file(
    inputs: &[DocumentInput],
    filing_status: FilingStatus,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<ReturnOutput, TaxError> {
    let output = file_return(inputs, filing_status, config).await?;
    let path = output_path.as_ref();
    let write_err = |source: std::io::Error| TaxError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| TaxError::Internal(format!("serialising return output: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    Ok(output)
}

/// Synchronous wrapper around [`file_return`].
///
/// Creates a temporary tokio runtime internally.
pub fn file_return_sync(
    inputs: &[DocumentInput],
    filing_status: FilingStatus,
    config: &PipelineConfig,
) -> Result<ReturnOutput, TaxError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TaxError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(file_return(inputs, filing_status, config))
}
