//! Document aggregation: canonical documents → return-level totals.
//!
//! Only known values are summed. Every value left out (unknown, or below the
//! confidence threshold) is recorded in `missing_fields` and as a warning, so
//! a return built from partial data says so instead of silently treating the
//! gaps as zero.

use crate::config::PipelineConfig;
use crate::engine::{self, TaxResult};
use crate::error::{DocumentError, TaxError};
use crate::schema::{
    Amount, CanonicalDocument, DocumentKind, Field, FilingStatus, SUPPORTED_TAX_YEAR,
};
use once_cell::sync::OnceCell;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Knobs for [`aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationOptions {
    pub tax_year: i32,
    /// Strict: a value counts iff its confidence is greater than this.
    pub confidence_threshold: Option<f64>,
    pub conflict_tolerance: Decimal,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            tax_year: SUPPORTED_TAX_YEAR,
            confidence_threshold: None,
            conflict_tolerance: Decimal::ONE,
        }
    }
}

impl From<&PipelineConfig> for AggregationOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            tax_year: config.tax_year,
            confidence_threshold: config.confidence_threshold,
            conflict_tolerance: config.conflict_tolerance,
        }
    }
}

/// Sums of contributing known values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub wages: Decimal,
    pub interest: Decimal,
    pub nonemployee_compensation: Decimal,
    /// Federal withholding across every document kind.
    pub withholding: Decimal,
}

/// Why a field did not contribute to the totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MissingReason {
    Unknown,
    BelowThreshold { confidence: f64, threshold: f64 },
}

/// A field excluded from the totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingField {
    /// Position of the document in upload order.
    pub document_index: usize,
    pub document: String,
    pub field: Field,
    #[serde(flatten)]
    pub reason: MissingReason,
}

/// Something the filer should review. Recorded, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum Warning {
    /// A field could not be extracted.
    FieldUnresolved { document: String, field: Field },
    /// A field was extracted with too little confidence to be counted.
    BelowConfidence {
        document: String,
        field: Field,
        confidence: f64,
        threshold: f64,
    },
    /// Two statements from the same payer report different withholding.
    WithholdingConflict {
        kind: DocumentKind,
        payer: String,
        first: String,
        first_amount: Decimal,
        second: String,
        second_amount: Decimal,
    },
    /// A statement is for a different tax year than the return.
    TaxYearMismatch {
        document: String,
        found: i32,
        expected: i32,
    },
    /// A document could not be extracted at all.
    DocumentFailed { document: String, error: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::FieldUnresolved { document, field } => {
                write!(f, "{document}: {field} could not be read; excluded from totals")
            }
            Warning::BelowConfidence {
                document,
                field,
                confidence,
                threshold,
            } => write!(
                f,
                "{document}: {field} confidence {confidence:.2} is not above {threshold:.2}; excluded from totals"
            ),
            Warning::WithholdingConflict {
                kind,
                payer,
                first,
                first_amount,
                second,
                second_amount,
            } => write!(
                f,
                "{kind} from {payer}: withholding differs between {first} (${first_amount}) and {second} (${second_amount}); both were counted"
            ),
            Warning::TaxYearMismatch {
                document,
                found,
                expected,
            } => write!(f, "{document}: tax year {found} does not match return year {expected}"),
            Warning::DocumentFailed { document, error } => {
                write!(f, "{document}: not included ({error})")
            }
        }
    }
}

/// Return-level view of every document for one filer.
///
/// Immutable once built: a changed document set means a new aggregate.
/// [`AggregateReturn::tax_result`] computes once and caches.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateReturn {
    filing_status: FilingStatus,
    tax_year: i32,
    totals: Totals,
    documents: Vec<CanonicalDocument>,
    missing_fields: Vec<MissingField>,
    warnings: Vec<Warning>,
    failed_documents: Vec<DocumentError>,
    /// First total whose sum did not fit in a `Decimal`.
    #[serde(skip_serializing_if = "Option::is_none")]
    out_of_range: Option<&'static str>,
    #[serde(skip)]
    tax_result: OnceCell<TaxResult>,
}

impl AggregateReturn {
    pub fn filing_status(&self) -> FilingStatus {
        self.filing_status
    }

    pub fn tax_year(&self) -> i32 {
        self.tax_year
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    /// Documents in upload order, including those with unresolved fields.
    pub fn documents(&self) -> &[CanonicalDocument] {
        &self.documents
    }

    pub fn missing_fields(&self) -> &[MissingField] {
        &self.missing_fields
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn failed_documents(&self) -> &[DocumentError] {
        &self.failed_documents
    }

    /// Name of the first total that overflowed while summing, if any.
    /// [`engine::compute`] refuses such an aggregate.
    pub fn out_of_range(&self) -> Option<&'static str> {
        self.out_of_range
    }

    /// Tax result for this aggregate, computed on first call.
    pub fn tax_result(&self) -> Result<&TaxResult, TaxError> {
        self.tax_result.get_or_try_init(|| engine::compute(self))
    }
}

/// Aggregate extracted documents.
pub fn aggregate(
    documents: &[CanonicalDocument],
    filing_status: FilingStatus,
    options: &AggregationOptions,
) -> AggregateReturn {
    aggregate_batch(documents, &[], filing_status, options)
}

/// Aggregate extracted documents, carrying the batch's per-document failures
/// through as warnings.
pub fn aggregate_batch(
    documents: &[CanonicalDocument],
    failed: &[DocumentError],
    filing_status: FilingStatus,
    options: &AggregationOptions,
) -> AggregateReturn {
    let mut totals = Totals::default();
    let mut missing_fields = Vec::new();
    let mut warnings = Vec::new();
    let mut out_of_range = None;

    for (index, doc) in documents.iter().enumerate() {
        let name = doc.display_name();

        if doc.tax_year != options.tax_year {
            warn!(
                "{}: tax year {} differs from {}",
                name, doc.tax_year, options.tax_year
            );
            warnings.push(Warning::TaxYearMismatch {
                document: name.clone(),
                found: doc.tax_year,
                expected: options.tax_year,
            });
        }

        for field in doc.kind().fields() {
            let reason = match (doc.amount(*field), options.confidence_threshold) {
                (Amount::Unknown, _) => Some(MissingReason::Unknown),
                (Amount::Known(_), Some(threshold)) if doc.confidence(*field) <= threshold => {
                    Some(MissingReason::BelowThreshold {
                        confidence: doc.confidence(*field),
                        threshold,
                    })
                }
                (Amount::Known(value), _) => {
                    if let Some((total, slot)) = total_slot(&mut totals, *field) {
                        match slot.checked_add(value) {
                            Some(sum) => *slot = sum,
                            None => {
                                warn!("{}: adding {} overflows {}", name, field, total);
                                out_of_range.get_or_insert(total);
                            }
                        }
                    }
                    None
                }
            };

            if let Some(reason) = reason {
                debug!("{}: {} excluded ({:?})", name, field, reason);
                warnings.push(match &reason {
                    MissingReason::Unknown => Warning::FieldUnresolved {
                        document: name.clone(),
                        field: *field,
                    },
                    MissingReason::BelowThreshold {
                        confidence,
                        threshold,
                    } => Warning::BelowConfidence {
                        document: name.clone(),
                        field: *field,
                        confidence: *confidence,
                        threshold: *threshold,
                    },
                });
                missing_fields.push(MissingField {
                    document_index: index,
                    document: name.clone(),
                    field: *field,
                    reason,
                });
            }
        }
    }

    warnings.extend(withholding_conflicts(documents, options.conflict_tolerance));

    for failure in failed {
        warnings.push(Warning::DocumentFailed {
            document: failure.document().to_string(),
            error: failure.to_string(),
        });
    }

    AggregateReturn {
        filing_status,
        tax_year: options.tax_year,
        totals,
        documents: documents.to_vec(),
        missing_fields,
        warnings,
        failed_documents: failed.to_vec(),
        out_of_range,
        tax_result: OnceCell::new(),
    }
}

fn total_slot(totals: &mut Totals, field: Field) -> Option<(&'static str, &mut Decimal)> {
    match field {
        Field::Wages => Some(("total_wages", &mut totals.wages)),
        Field::InterestIncome => Some(("total_interest", &mut totals.interest)),
        Field::NonemployeeCompensation => Some((
            "total_nonemployee_compensation",
            &mut totals.nonemployee_compensation,
        )),
        Field::FederalWithholding => Some(("total_withholding", &mut totals.withholding)),
        // Informational boxes; they never enter gross income.
        Field::SocialSecurityWages | Field::MedicareWages => None,
    }
}

fn normalise_payer(payer: &str) -> String {
    payer
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Statements of one kind from one payer to one recipient whose known
/// withholding differs by more than `tolerance`.
fn withholding_conflicts(documents: &[CanonicalDocument], tolerance: Decimal) -> Vec<Warning> {
    type Key = (DocumentKind, String, Option<String>);
    let mut groups: BTreeMap<Key, Vec<&CanonicalDocument>> = BTreeMap::new();
    for doc in documents {
        let Some(payer) = doc.payer_name.as_deref() else {
            continue;
        };
        let key = (
            doc.kind(),
            normalise_payer(payer),
            doc.recipient_tin_last4.clone(),
        );
        groups.entry(key).or_default().push(doc);
    }

    let mut warnings = Vec::new();
    for docs in groups.values().filter(|g| g.len() > 1) {
        let known: Vec<(&CanonicalDocument, Decimal)> = docs
            .iter()
            .filter_map(|d| d.amount(Field::FederalWithholding).known().map(|v| (*d, v)))
            .collect();
        for (i, (first, a)) in known.iter().enumerate() {
            for (second, b) in &known[i + 1..] {
                if (*a - *b).abs() > tolerance {
                    warn!(
                        "Withholding conflict: {} vs {}",
                        first.display_name(),
                        second.display_name()
                    );
                    warnings.push(Warning::WithholdingConflict {
                        kind: first.kind(),
                        payer: first.payer_name.clone().unwrap_or_default(),
                        first: first.display_name(),
                        first_amount: *a,
                        second: second.display_name(),
                        second_amount: *b,
                    });
                }
            }
        }
    }
    warnings
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::{ExtractionSource, StatementFields};

    pub(crate) fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    /// Document with the given known values; all others unknown.
    pub(crate) fn doc(
        name: &str,
        kind: DocumentKind,
        values: &[(Field, &str)],
    ) -> CanonicalDocument {
        let mut fields = StatementFields::unresolved(kind);
        let mut field_confidence = BTreeMap::new();
        for f in kind.fields() {
            field_confidence.insert(*f, 0.0);
        }
        for (field, value) in values {
            assert!(fields.set(*field, Amount::Known(dec(value))));
            field_confidence.insert(*field, 0.9);
        }
        CanonicalDocument {
            source_name: Some(name.to_string()),
            payer_name: None,
            recipient_tin_last4: None,
            tax_year: 2024,
            extraction_source: ExtractionSource::TextLayer,
            field_confidence,
            fields,
        }
    }

    fn w2(name: &str, wages: &str, withheld: &str) -> CanonicalDocument {
        doc(
            name,
            DocumentKind::WageStatement,
            &[
                (Field::Wages, wages),
                (Field::FederalWithholding, withheld),
                (Field::SocialSecurityWages, wages),
                (Field::MedicareWages, wages),
            ],
        )
    }

    #[test]
    fn sums_per_kind() {
        let docs = vec![
            w2("a.pdf", "50000.00", "6000.00"),
            w2("b.pdf", "10000.00", "1000.00"),
            doc(
                "int.pdf",
                DocumentKind::InterestStatement,
                &[
                    (Field::InterestIncome, "126.43"),
                    (Field::FederalWithholding, "0"),
                ],
            ),
            doc(
                "nec.pdf",
                DocumentKind::NonemployeeCompensation,
                &[
                    (Field::NonemployeeCompensation, "8200"),
                    (Field::FederalWithholding, "0"),
                ],
            ),
        ];
        let agg = aggregate(&docs, FilingStatus::Single, &AggregationOptions::default());
        let t = agg.totals();
        assert_eq!(t.wages, dec("60000.00"));
        assert_eq!(t.interest, dec("126.43"));
        assert_eq!(t.nonemployee_compensation, dec("8200"));
        assert_eq!(t.withholding, dec("7000.00"));
        assert!(agg.missing_fields().is_empty());
        assert!(agg.warnings().is_empty());
        assert_eq!(agg.documents().len(), 4);
    }

    #[test]
    fn overflowing_total_is_flagged_not_panicked() {
        let max = Decimal::MAX.to_string();
        let docs = vec![w2("a.pdf", &max, "10"), w2("b.pdf", &max, "20")];
        let agg = aggregate(&docs, FilingStatus::Single, &AggregationOptions::default());
        assert_eq!(agg.out_of_range(), Some("total_wages"));
        assert_eq!(agg.totals().wages, Decimal::MAX);
        assert_eq!(agg.totals().withholding, dec("30"));
        assert!(matches!(
            agg.tax_result(),
            Err(TaxError::TotalOutOfRange {
                field: "total_wages"
            })
        ));
    }

    #[test]
    fn all_unknown_document_contributes_zero_and_is_fully_missing() {
        let docs = vec![doc("blank.pdf", DocumentKind::WageStatement, &[])];
        let agg = aggregate(&docs, FilingStatus::Single, &AggregationOptions::default());
        assert_eq!(*agg.totals(), Totals::default());
        assert_eq!(agg.missing_fields().len(), 4);
        assert!(agg
            .missing_fields()
            .iter()
            .all(|m| m.document_index == 0 && m.reason == MissingReason::Unknown));
        assert_eq!(agg.documents().len(), 1);
        assert_eq!(agg.warnings().len(), 4);
    }

    #[test]
    fn threshold_is_strict() {
        let mut d = w2("a.pdf", "100", "10");
        d.field_confidence.insert(Field::Wages, 0.7);
        let options = AggregationOptions {
            confidence_threshold: Some(0.7),
            ..Default::default()
        };
        let agg = aggregate(&[d], FilingStatus::Single, &options);
        assert_eq!(agg.totals().wages, Decimal::ZERO);
        assert_eq!(agg.totals().withholding, dec("10"));
        assert!(matches!(
            agg.missing_fields()[0].reason,
            MissingReason::BelowThreshold { .. }
        ));
        assert!(matches!(agg.warnings()[0], Warning::BelowConfidence { .. }));
    }

    #[test]
    fn withholding_conflict_is_flagged_and_both_summed() {
        let mut a = w2("a.pdf", "100", "10.00");
        let mut b = w2("b.pdf", "100", "25.00");
        a.payer_name = Some("Acme Corp".into());
        b.payer_name = Some("ACME corp.".into());
        let agg = aggregate(&[a, b], FilingStatus::Single, &AggregationOptions::default());
        assert_eq!(agg.totals().withholding, dec("35.00"));
        assert_eq!(agg.warnings().len(), 1);
        assert!(matches!(
            agg.warnings()[0],
            Warning::WithholdingConflict { .. }
        ));
    }

    #[test]
    fn withholding_within_tolerance_is_not_a_conflict() {
        let mut a = w2("a.pdf", "100", "10.00");
        let mut b = w2("b.pdf", "100", "10.75");
        a.payer_name = Some("Acme".into());
        b.payer_name = Some("Acme".into());
        let agg = aggregate(&[a, b], FilingStatus::Single, &AggregationOptions::default());
        assert!(agg.warnings().is_empty());
    }

    #[test]
    fn tax_year_mismatch_is_warned_but_counted() {
        let mut d = w2("old.pdf", "100", "10");
        d.tax_year = 2023;
        let agg = aggregate(&[d], FilingStatus::Single, &AggregationOptions::default());
        assert_eq!(agg.totals().wages, dec("100"));
        assert!(matches!(
            agg.warnings()[0],
            Warning::TaxYearMismatch {
                found: 2023,
                expected: 2024,
                ..
            }
        ));
    }

    #[test]
    fn failed_documents_are_surfaced() {
        let failure = DocumentError::UnrecognizedDocument {
            document: "mystery.pdf".into(),
            detail: "no markers".into(),
        };
        let agg = aggregate_batch(
            &[w2("a.pdf", "1", "0")],
            &[failure.clone()],
            FilingStatus::Single,
            &AggregationOptions::default(),
        );
        assert_eq!(agg.failed_documents(), &[failure]);
        assert!(agg
            .warnings()
            .iter()
            .any(|w| matches!(w, Warning::DocumentFailed { document, .. } if document == "mystery.pdf")));
    }

    #[test]
    fn warning_display() {
        let w = Warning::FieldUnresolved {
            document: "w2.pdf".into(),
            field: Field::Wages,
        };
        assert_eq!(
            w.to_string(),
            "w2.pdf: wages could not be read; excluded from totals"
        );
    }
}
