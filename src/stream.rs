//! Streaming extraction API: emit document outcomes as they complete.
//!
//! [`crate::batch::extract_batch`] returns only after every document has been
//! attempted. [`extract_stream`] yields each [`DocumentOutcome`] as soon as
//! it is ready, which lets callers drive a progress display or persist
//! per-document results incrementally. Outcomes arrive in completion order;
//! sort by `index`, or use [`extract_stream_ordered`], if order matters.
//!
//! Collect the successful documents and hand them to
//! [`crate::aggregate::aggregate_batch`] to finish the return.

use crate::batch::{extract_one, Fallback};
use crate::config::PipelineConfig;
use crate::output::DocumentOutcome;
use crate::pipeline::input::DocumentInput;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of document outcomes.
pub type DocumentStream = Pin<Box<dyn Stream<Item = DocumentOutcome> + Send>>;

/// Extract documents concurrently, emitting outcomes in completion order.
///
/// The fallback backend is resolved up front, and only if some input needs
/// it. Failures are carried inside each outcome; the stream itself never
/// errors.
///
/// # Example
/// ```rust,no_run
/// use taxreturn_core::{extract_stream, DocumentInput, PipelineConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() {
/// let inputs = vec![DocumentInput::from_text("w2.txt", "Form W-2 ...")];
/// let mut stream = extract_stream(inputs, &PipelineConfig::default());
/// while let Some(outcome) = stream.next().await {
///     match &outcome.result {
///         Ok(doc) => println!("{}: {}", outcome.name, doc.kind()),
///         Err(e) => eprintln!("{e}"),
///     }
/// }
/// # }
/// ```
pub fn extract_stream(inputs: Vec<DocumentInput>, config: &PipelineConfig) -> DocumentStream {
    let concurrency = config.concurrency;
    Box::pin(outcome_futures(inputs, config).buffer_unordered(concurrency))
}

/// Like [`extract_stream`], but outcomes are emitted in upload order.
///
/// Documents are still extracted concurrently; a slow document holds back
/// the ones after it.
pub fn extract_stream_ordered(
    inputs: Vec<DocumentInput>,
    config: &PipelineConfig,
) -> DocumentStream {
    let concurrency = config.concurrency;
    Box::pin(outcome_futures(inputs, config).buffered(concurrency))
}

fn outcome_futures(
    inputs: Vec<DocumentInput>,
    config: &PipelineConfig,
) -> impl Stream<Item = impl std::future::Future<Output = DocumentOutcome> + Send> + Send {
    let total = inputs.len();
    info!("Streaming extraction of {} document(s)", total);

    let fallback = Arc::new(Fallback::for_inputs(&inputs, config));
    let config = Arc::new(config.clone());

    stream::iter(inputs.into_iter().enumerate().map(move |(index, input)| {
        let fallback = Arc::clone(&fallback);
        let config = Arc::clone(&config);
        async move { extract_one(index, total, &input, &fallback, &config).await }
    }))
}
