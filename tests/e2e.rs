//! End-to-end integration tests for taxreturn-core.
//!
//! Scanned documents are routed through a scripted [`FallbackInference`]
//! backend, so these tests never touch the network and need no API key.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use futures::StreamExt;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taxreturn_core::{
    extract_batch, extract_stream, file_return, file_return_from_paths, file_return_sync,
    BatchProgressCallback, DocumentError, DocumentInput, ExtractionSource, FallbackInference,
    Field, FilingStatus, InferenceError, MissingReason, Outcome, PipelineConfig, ReturnOutput,
    TaxError, Warning,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

const W2_TEXT: &str = "Form W-2 Wage and Tax Statement 2024\n\
Employer's name: Acme Corp\n\
1 Wages, tips, other compensation 50,000.00 2 Federal income tax withheld 6,000.00";

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Fallback backend that answers from a script keyed by document name.
///
/// Each name maps to a queue of replies; the last reply repeats.
#[derive(Default)]
struct ScriptedFallback {
    replies: Mutex<HashMap<String, Vec<Result<String, InferenceError>>>>,
    calls: AtomicUsize,
}

impl ScriptedFallback {
    fn with(self, name: &str, reply: &str) -> Self {
        self.push(name, Ok(reply.to_string()))
    }

    fn push(self, name: &str, reply: Result<String, InferenceError>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(reply);
        self
    }
}

#[async_trait]
impl FallbackInference for ScriptedFallback {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn infer(&self, input: &DocumentInput) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        let queue = replies
            .get_mut(&input.name)
            .ok_or_else(|| InferenceError::Permanent(format!("no script for {}", input.name)))?;
        if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue[0].clone()
        }
    }
}

/// Backend that never answers.
struct StalledFallback;

#[async_trait]
impl FallbackInference for StalledFallback {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn infer(&self, _input: &DocumentInput) -> Result<String, InferenceError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(String::new())
    }
}

fn config_with(backend: Arc<dyn FallbackInference>) -> PipelineConfig {
    PipelineConfig::builder()
        .fallback(backend)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

fn failed_names(output: &ReturnOutput) -> Vec<&str> {
    output
        .summary
        .failed_documents
        .iter()
        .map(|e| e.document())
        .collect()
}

// ── Worked example ───────────────────────────────────────────────────────────

#[test]
fn test_fifty_thousand_single_filer() {
    let inputs = vec![DocumentInput::from_text("w2.txt", W2_TEXT)];
    let output = file_return_sync(&inputs, FilingStatus::Single, &PipelineConfig::default())
        .unwrap();

    let tax = &output.tax_result;
    assert_eq!(tax.gross_income, dec("50000.00"));
    assert_eq!(tax.standard_deduction, dec("14600"));
    assert_eq!(tax.taxable_income, dec("35400.00"));
    assert_eq!(tax.tax_before_credits, dec("4016.00"));
    assert_eq!(tax.refund_or_due, dec("1984.00"));

    assert_eq!(output.summary.outcome, Outcome::Refund(dec("1984.00")));
    assert_eq!(output.summary.line("1a"), Some(dec("50000.00")));
    assert_eq!(output.summary.line("25d"), Some(dec("6000.00")));
    assert_eq!(output.stats.extracted_documents, 1);
    assert_eq!(output.stats.fallback_documents, 0);
}

#[test]
fn test_return_output_json_shape() {
    let inputs = vec![DocumentInput::from_text("w2.txt", W2_TEXT)];
    let output = file_return_sync(&inputs, FilingStatus::Single, &PipelineConfig::default())
        .unwrap();
    let json = serde_json::to_value(&output).unwrap();

    assert_eq!(json["summary"]["outcome"]["outcome"], "refund");
    assert_eq!(json["summary"]["outcome"]["amount"], "1984.00");
    assert_eq!(json["summary"]["filing_status"], "single");
    assert_eq!(json["tax_result"]["tax_before_credits"], "4016.00");
    assert!(json["documents"][0]["result"]["Ok"].is_object());
}

#[test]
fn test_oversized_wages_do_not_abort_batch() {
    let huge = "Form W-2 Wage and Tax Statement 2024\n\
1 Wages, tips, other compensation 79228162514264337593543950335 2 Federal income tax withheld 100.00";
    let inputs = vec![
        DocumentInput::from_text("a.txt", huge),
        DocumentInput::from_text("b.txt", huge),
    ];
    let output = file_return_sync(&inputs, FilingStatus::Single, &PipelineConfig::default())
        .unwrap();

    assert_eq!(output.tax_result.gross_income, Decimal::ZERO);
    assert_eq!(output.tax_result.total_withholding, dec("200.00"));
    let missing_wages = output
        .summary
        .missing_fields
        .iter()
        .filter(|m| m.field == Field::Wages)
        .count();
    assert_eq!(missing_wages, 2);
}

// ── Mixed batches ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_text_and_scanned_documents_combine() {
    let backend = ScriptedFallback::default().with(
        "nec-scan.pdf",
        r#"{"form_type": "1099-NEC", "payer_name": "Client LLC",
            "nonemployee_compensation": 10000, "federal_withholding": 0, "tax_year": 2024}"#,
    );
    let inputs = vec![
        DocumentInput::from_text("w2.txt", W2_TEXT),
        DocumentInput::scanned("nec-scan.pdf", 1),
    ];
    let output = file_return(&inputs, FilingStatus::Single, &config_with(Arc::new(backend)))
        .await
        .unwrap();

    // 60,000 − 14,600 = 45,400: 1,160 + 12% of 33,800 = 5,216.
    assert_eq!(output.tax_result.gross_income, dec("60000.00"));
    assert_eq!(output.tax_result.tax_before_credits, dec("5216.00"));
    assert_eq!(output.tax_result.refund_or_due, dec("784.00"));
    assert_eq!(output.summary.line("8"), Some(dec("10000.00")));

    assert_eq!(output.documents.len(), 2);
    assert_eq!(output.documents[0].source, ExtractionSource::TextLayer);
    assert_eq!(output.documents[1].source, ExtractionSource::InferredFallback);
    assert_eq!(output.stats.fallback_documents, 1);
    assert!(output.summary.failed_documents.is_empty());
}

#[tokio::test]
async fn test_fallback_reply_with_braces_in_trailing_prose() {
    let backend = ScriptedFallback::default().with(
        "w2-scan.pdf",
        r#"{"form_type": "W-2", "wages": 100, "federal_withholding": 10} (values in {USD})"#,
    );
    let inputs = vec![DocumentInput::scanned("w2-scan.pdf", 1)];
    let output = file_return(&inputs, FilingStatus::Single, &config_with(Arc::new(backend)))
        .await
        .unwrap();

    assert_eq!(output.tax_result.gross_income, dec("100"));
    assert_eq!(output.tax_result.total_withholding, dec("10"));
    assert!(output.summary.failed_documents.is_empty());
}

#[tokio::test]
async fn test_non_numeric_fallback_wages_become_missing_field() {
    let backend = ScriptedFallback::default().with(
        "w2-scan.pdf",
        r#"{"form_type": "W-2", "wages": "smudged", "federal_withholding": 700}"#,
    );
    let inputs = vec![
        DocumentInput::scanned("w2-scan.pdf", 1),
        DocumentInput::from_text("w2.txt", W2_TEXT),
    ];
    let output = file_return(&inputs, FilingStatus::Single, &config_with(Arc::new(backend)))
        .await
        .unwrap();

    // The unreadable wages are excluded; the rest of the batch still counts.
    assert_eq!(output.tax_result.gross_income, dec("50000.00"));
    assert_eq!(output.tax_result.total_withholding, dec("6700.00"));
    assert!(output.summary.missing_fields.iter().any(|m| {
        m.document == "w2-scan.pdf"
            && m.field == Field::Wages
            && m.reason == MissingReason::Unknown
    }));
    assert!(output.summary.warnings.iter().any(|w| matches!(
        w,
        Warning::FieldUnresolved { document, field: Field::Wages } if document == "w2-scan.pdf"
    )));
}

#[tokio::test]
async fn test_failed_documents_are_surfaced_not_dropped() {
    let backend = ScriptedFallback::default()
        .push(
            "denied.pdf",
            Err(InferenceError::Permanent("401 unauthorized".into())),
        )
        .with("mystery.pdf", r#"{"form_type": "1099-DIV", "dividends": 12}"#);
    let inputs = vec![
        DocumentInput::from_text("w2.txt", W2_TEXT),
        DocumentInput::scanned("denied.pdf", 1),
        DocumentInput::scanned("mystery.pdf", 1),
        DocumentInput::from_text("junk.txt", "%%%"),
    ];
    let output = file_return(&inputs, FilingStatus::Single, &config_with(Arc::new(backend)))
        .await
        .unwrap();

    assert_eq!(
        failed_names(&output),
        vec!["denied.pdf", "mystery.pdf", "junk.txt"]
    );
    assert!(matches!(
        output.summary.failed_documents[0],
        DocumentError::FallbackFailed { retries: 0, .. }
    ));
    assert!(matches!(
        output.summary.failed_documents[1],
        DocumentError::UnrecognizedDocument { .. }
    ));
    assert!(matches!(
        output.summary.failed_documents[2],
        DocumentError::MalformedInput { .. }
    ));
    let failed_warnings = output
        .summary
        .warnings
        .iter()
        .filter(|w| matches!(w, Warning::DocumentFailed { .. }))
        .count();
    assert_eq!(failed_warnings, 3);
    assert_eq!(output.stats.failed_documents, 3);
    assert_eq!(output.tax_result.refund_or_due, dec("1984.00"));
}

#[tokio::test]
async fn test_every_document_failing_is_fatal() {
    let backend = ScriptedFallback::default().with("scan.pdf", "I cannot read this image.");
    let inputs = vec![
        DocumentInput::scanned("scan.pdf", 2),
        DocumentInput::from_text("empty.txt", ""),
    ];
    let err = file_return(&inputs, FilingStatus::Single, &config_with(Arc::new(backend)))
        .await
        .unwrap_err();
    match err {
        TaxError::NoDocuments {
            failed,
            first_error,
        } => {
            assert_eq!(failed, 2);
            assert!(first_error.contains("scan.pdf"), "{first_error}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ── Retry and timeout ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let backend = Arc::new(
        ScriptedFallback::default()
            .push(
                "int-scan.pdf",
                Err(InferenceError::Transient("503 service unavailable".into())),
            )
            .with(
                "int-scan.pdf",
                r#"{"form_type": "1099-INT", "interest_income": "$126.43"}"#,
            ),
    );
    let inputs = vec![DocumentInput::scanned("int-scan.pdf", 1)];
    let config = config_with(backend.clone());
    let batch = extract_batch(&inputs, &config).await;

    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert_eq!(batch.outcomes[0].retries, 1);
    assert_eq!(batch.stats.total_retries, 1);
    let doc = batch.outcomes[0].result.as_ref().unwrap();
    assert_eq!(doc.amount(Field::InterestIncome).known(), Some(dec("126.43")));
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let backend = Arc::new(ScriptedFallback::default().push(
        "scan.pdf",
        Err(InferenceError::Transient("connection reset".into())),
    ));
    let inputs = vec![DocumentInput::scanned("scan.pdf", 1)];
    let config = PipelineConfig::builder()
        .fallback(backend.clone())
        .max_retries(2)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    let batch = extract_batch(&inputs, &config).await;

    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    assert!(matches!(
        batch.outcomes[0].result,
        Err(DocumentError::FallbackFailed { retries: 2, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_fallback_times_out_without_blocking_batch() {
    let inputs = vec![
        DocumentInput::from_text("w2.txt", W2_TEXT),
        DocumentInput::scanned("stuck.pdf", 1),
    ];
    let config = PipelineConfig::builder()
        .fallback(Arc::new(StalledFallback))
        .fallback_timeout_secs(5)
        .max_retries(0)
        .build()
        .unwrap();
    let output = file_return(&inputs, FilingStatus::Single, &config)
        .await
        .unwrap();

    assert_eq!(
        output.summary.failed_documents,
        vec![DocumentError::FallbackTimeout {
            document: "stuck.pdf".into(),
            timeout_ms: 5_000,
        }]
    );
    assert_eq!(output.tax_result.refund_or_due, dec("1984.00"));
}

// ── Aggregation across documents ─────────────────────────────────────────────

#[tokio::test]
async fn test_duplicate_statements_with_conflicting_withholding() {
    let reply = |withheld: &str| {
        format!(
            r#"{{"form_type": "W-2", "employer_name": "Acme Corp", "employee_ssn": "XXX-XX-1234",
                "wages": 20000, "federal_withholding": {withheld}}}"#
        )
    };
    let backend = ScriptedFallback::default()
        .with("acme-a.pdf", &reply("2000"))
        .with("acme-b.pdf", &reply("2500"))
        .with("acme-c.pdf", &reply("2000.50"));
    let inputs = vec![
        DocumentInput::scanned("acme-a.pdf", 1),
        DocumentInput::scanned("acme-b.pdf", 1),
        DocumentInput::scanned("acme-c.pdf", 1),
    ];
    let output = file_return(
        &inputs,
        FilingStatus::MarriedFilingJointly,
        &config_with(Arc::new(backend)),
    )
    .await
    .unwrap();

    // All three statements are counted.
    assert_eq!(output.tax_result.gross_income, dec("60000.00"));
    assert_eq!(output.tax_result.total_withholding, dec("6500.50"));

    // a/b and b/c differ by more than $1; a/c are within tolerance.
    let conflicts: Vec<(&str, &str)> = output
        .summary
        .warnings
        .iter()
        .filter_map(|w| match w {
            Warning::WithholdingConflict { first, second, .. } => {
                Some((first.as_str(), second.as_str()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        conflicts,
        vec![("acme-a.pdf", "acme-b.pdf"), ("acme-b.pdf", "acme-c.pdf")]
    );
}

#[tokio::test]
async fn test_confidence_threshold_excludes_uncertain_fields() {
    // Numbers are reported with higher confidence than numeric strings.
    let backend = ScriptedFallback::default().with(
        "w2-scan.pdf",
        r#"{"form_type": "W-2", "wages": 40000, "federal_withholding": "$3,000.00"}"#,
    );
    let inputs = vec![DocumentInput::scanned("w2-scan.pdf", 1)];
    let config = PipelineConfig::builder()
        .fallback(Arc::new(backend))
        .confidence_threshold(0.7)
        .build()
        .unwrap();
    let output = file_return(&inputs, FilingStatus::Single, &config)
        .await
        .unwrap();

    assert_eq!(output.tax_result.gross_income, dec("40000.00"));
    assert_eq!(output.tax_result.total_withholding, Decimal::ZERO);
    assert!(output.summary.missing_fields.iter().any(|m| {
        m.field == Field::FederalWithholding
            && matches!(m.reason, MissingReason::BelowThreshold { .. })
    }));
}

#[test]
fn test_statement_for_another_year_is_flagged() {
    let text = W2_TEXT.replace("2024", "2023");
    let inputs = vec![DocumentInput::from_text("old-w2.txt", text)];
    let output = file_return_sync(&inputs, FilingStatus::Single, &PipelineConfig::default())
        .unwrap();
    assert!(output.summary.warnings.iter().any(|w| matches!(
        w,
        Warning::TaxYearMismatch { found: 2023, expected: 2024, .. }
    )));
}

// ── Streaming ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_emits_every_outcome() {
    let backend = ScriptedFallback::default().with(
        "nec-scan.pdf",
        r#"{"form_type": "1099-NEC", "nonemployee_compensation": 900}"#,
    );
    let inputs = vec![
        DocumentInput::from_text("w2.txt", W2_TEXT),
        DocumentInput::scanned("nec-scan.pdf", 1),
        DocumentInput::scanned("unscripted.pdf", 1),
    ];
    let config = config_with(Arc::new(backend));
    let mut outcomes: Vec<_> = extract_stream(inputs, &config).collect().await;
    outcomes.sort_by_key(|o| o.index);

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_ok());
    assert!(outcomes[1].is_ok());
    assert!(matches!(
        outcomes[2].result,
        Err(DocumentError::FallbackFailed { .. })
    ));
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CountingCallback {
    started: AtomicUsize,
    completed: AtomicUsize,
    errored: AtomicUsize,
    batch_total: AtomicUsize,
    batch_success: AtomicUsize,
}

impl BatchProgressCallback for CountingCallback {
    fn on_batch_start(&self, total: usize) {
        self.batch_total.store(total, Ordering::SeqCst);
    }
    fn on_document_start(&self, _index: usize, _total: usize, _name: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_complete(&self, _index: usize, _total: usize, _name: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_error(&self, _index: usize, _total: usize, _error: &str) {
        self.errored.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, _total: usize, success_count: usize) {
        self.batch_success.store(success_count, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_progress_callback_sees_every_document() {
    let cb = Arc::new(CountingCallback::default());
    let config = PipelineConfig::builder()
        .progress_callback(cb.clone())
        .build()
        .unwrap();
    let inputs = vec![
        DocumentInput::from_text("a.txt", W2_TEXT),
        DocumentInput::from_text("b.txt", W2_TEXT),
        DocumentInput::from_text("junk.txt", "%%%"),
    ];
    file_return(&inputs, FilingStatus::Single, &config)
        .await
        .unwrap();

    assert_eq!(cb.batch_total.load(Ordering::SeqCst), 3);
    assert_eq!(cb.started.load(Ordering::SeqCst), 3);
    assert_eq!(cb.completed.load(Ordering::SeqCst), 2);
    assert_eq!(cb.errored.load(Ordering::SeqCst), 1);
    assert_eq!(cb.batch_success.load(Ordering::SeqCst), 2);
}

// ── Loading from disk ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_file_return_from_text_and_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let w2_path = dir.path().join("w2.txt");
    std::fs::write(&w2_path, W2_TEXT).unwrap();
    let manifest_path = dir.path().join("scans.json");
    std::fs::write(
        &manifest_path,
        r#"[{"name": "int-scan.pdf", "kind_hint": "1099-INT",
             "pages": [{"text": "", "text_layer_ok": false}]}]"#,
    )
    .unwrap();

    let backend = ScriptedFallback::default().with("int-scan.pdf", r#"{"interest": 100}"#);
    let paths: Vec<PathBuf> = vec![w2_path, manifest_path];
    let output = file_return_from_paths(
        &paths,
        FilingStatus::HeadOfHousehold,
        &config_with(Arc::new(backend)),
    )
    .await
    .unwrap();

    assert_eq!(output.documents.len(), 2);
    assert_eq!(output.summary.line("2b"), Some(dec("100.00")));
    assert_eq!(output.tax_result.gross_income, dec("50100.00"));
    assert_eq!(output.tax_result.standard_deduction, dec("21900"));
}

#[tokio::test]
async fn test_missing_input_file_is_fatal() {
    let paths = vec![PathBuf::from("/definitely/not/here.txt")];
    let err = file_return_from_paths(&paths, FilingStatus::Single, &PipelineConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TaxError::InputRead { .. }));
}

// ── Configuration ────────────────────────────────────────────────────────────

#[test]
fn test_unsupported_tax_year_rejected_at_build() {
    let err = PipelineConfig::builder().tax_year(2025).build().unwrap_err();
    assert!(matches!(
        err,
        TaxError::UnsupportedTaxYear {
            year: 2025,
            supported: 2024
        }
    ));
}

#[test]
fn test_callback_and_backend_are_send_sync() {
    fn assert_send_sync<T: Send + Sync + ?Sized>() {}
    assert_send_sync::<dyn BatchProgressCallback>();
    assert_send_sync::<dyn FallbackInference>();
    assert_send_sync::<PipelineConfig>();
}
