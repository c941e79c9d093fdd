//! Validation of JSON produced by fallback inference.
//!
//! The inference backend is best-effort: keys come back under a handful of
//! aliases, amounts arrive as numbers, strings like `"$1,234.50"`, or prose
//! like `"not visible"`. Everything is re-validated here; nothing the backend
//! says is trusted as-is.

use crate::error::ExtractionError;
use crate::pipeline::normalize::json_object_span;
use crate::pipeline::text::parse_money;
use crate::schema::{
    Amount, CanonicalDocument, DocumentKind, ExtractionSource, Field, StatementFields,
    SUPPORTED_TAX_YEAR,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

/// Confidence for a JSON number.
pub const NUMBER_CONFIDENCE: f64 = 0.8;
/// Confidence for a numeric string that had to be parsed.
pub const NUMERIC_STRING_CONFIDENCE: f64 = 0.6;

const KIND_KEYS: &[&str] = &["form_type", "kind", "document_type", "form"];

/// Accepted keys per canonical field.
fn field_aliases(field: Field) -> &'static [&'static str] {
    match field {
        Field::Wages => &[
            "wages",
            "wages_tips_other_compensation",
            "wages_tips_and_other_compensation",
        ],
        Field::FederalWithholding => &[
            "federal_withholding",
            "federal_income_tax_withheld",
            "federal_tax_withheld",
        ],
        Field::SocialSecurityWages => &["social_security_wages"],
        Field::MedicareWages => &["medicare_wages", "medicare_wages_and_tips"],
        Field::InterestIncome => &["interest_income", "interest"],
        Field::NonemployeeCompensation => &["nonemployee_compensation", "nonemployee_comp"],
    }
}

const PAYER_KEYS: &[&str] = &["payer_name", "payer", "employer_name", "employer"];
const TIN_KEYS: &[&str] = &[
    "recipient_tin_last4",
    "recipient_tin",
    "recipient_ssn",
    "employee_ssn",
];
const YEAR_KEYS: &[&str] = &["tax_year", "year"];

fn all_known_keys() -> impl Iterator<Item = &'static str> {
    const FIELDS: [Field; 6] = [
        Field::Wages,
        Field::FederalWithholding,
        Field::SocialSecurityWages,
        Field::MedicareWages,
        Field::InterestIncome,
        Field::NonemployeeCompensation,
    ];
    FIELDS
        .into_iter()
        .flat_map(field_aliases)
        .copied()
        .chain(KIND_KEYS.iter().copied())
        .chain(PAYER_KEYS.iter().copied())
        .chain(TIN_KEYS.iter().copied())
        .chain(YEAR_KEYS.iter().copied())
}

fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn string_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decide the kind: explicit key, then hint, then keys only one kind has.
fn resolve_kind(
    obj: &Map<String, Value>,
    hint: Option<DocumentKind>,
) -> Result<DocumentKind, ExtractionError> {
    if let Some(declared) = first_present(obj, KIND_KEYS).and_then(string_value) {
        return DocumentKind::from_hint(&declared).ok_or_else(|| {
            ExtractionError::UnrecognizedDocument {
                detail: format!("unsupported form type '{}'", declared),
            }
        });
    }
    if let Some(kind) = hint {
        return Ok(kind);
    }
    let evidenced: Vec<DocumentKind> = DocumentKind::ALL
        .into_iter()
        .filter(|kind| {
            kind.fields()
                .iter()
                .filter(|f| **f != Field::FederalWithholding)
                .any(|f| first_present(obj, field_aliases(*f)).is_some())
        })
        .collect();
    match evidenced.as_slice() {
        [kind] => Ok(*kind),
        [] => Err(ExtractionError::UnrecognizedDocument {
            detail: "inferred data names no form type and carries no form-specific fields".into(),
        }),
        _ => Err(ExtractionError::UnrecognizedDocument {
            detail: "inferred data mixes fields of several form types".into(),
        }),
    }
}

fn to_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Validate one amount. Returns the amount and its confidence.
fn validate_amount(field: Field, value: &Value) -> (Amount, f64) {
    let parsed = match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| Decimal::from_scientific(&n.to_string()).ok())
            .or_else(|| n.as_f64().and_then(Decimal::from_f64))
            .map(|d| (d, NUMBER_CONFIDENCE)),
        Value::String(s) => parse_money(s).map(|d| (d, NUMERIC_STRING_CONFIDENCE)),
        _ => None,
    };
    match parsed {
        Some((d, conf)) => match Amount::from_box(to_cents(d)) {
            Amount::Unknown => {
                debug!("{}: implausible inferred value {} treated as unknown", field, d);
                (Amount::Unknown, 0.0)
            }
            known => (known, conf),
        },
        None => {
            debug!("{}: non-numeric inferred value {} treated as unknown", field, value);
            (Amount::Unknown, 0.0)
        }
    }
}

fn last_four_digits(value: &str) -> Option<String> {
    let digits: Vec<char> = value.chars().filter(|c| c.is_ascii_digit()).collect();
    (digits.len() >= 4).then(|| digits[digits.len() - 4..].iter().collect())
}

/// Build a canonical document from an inference reply.
pub fn extract_inferred(
    reply: &str,
    hint: Option<DocumentKind>,
) -> Result<CanonicalDocument, ExtractionError> {
    let span = json_object_span(reply).ok_or_else(|| ExtractionError::MalformedInput {
        reason: "inference reply contains no JSON object".into(),
    })?;
    let value: Value =
        serde_json::from_str(&span).map_err(|e| ExtractionError::MalformedInput {
            reason: format!("inference reply is not valid JSON: {e}"),
        })?;
    let Value::Object(obj) = value else {
        return Err(ExtractionError::MalformedInput {
            reason: "inference reply is not a JSON object".into(),
        });
    };

    let kind = resolve_kind(&obj, hint)?;

    let known: Vec<&str> = all_known_keys().collect();
    for key in obj.keys().filter(|k| !known.contains(&k.as_str())) {
        debug!("Dropping unknown inferred key '{}'", key);
    }
    for field in [
        Field::Wages,
        Field::SocialSecurityWages,
        Field::MedicareWages,
        Field::InterestIncome,
        Field::NonemployeeCompensation,
    ] {
        if !kind.fields().contains(&field) && first_present(&obj, field_aliases(field)).is_some() {
            debug!("Dropping {} on a {} document", field, kind);
        }
    }

    let mut fields = StatementFields::unresolved(kind);
    let mut field_confidence = BTreeMap::new();
    for field in kind.fields() {
        let (amount, confidence) = match first_present(&obj, field_aliases(*field)) {
            Some(value) => validate_amount(*field, value),
            None => (Amount::Unknown, 0.0),
        };
        fields.set(*field, amount);
        field_confidence.insert(*field, confidence);
    }

    let tax_year = first_present(&obj, YEAR_KEYS)
        .and_then(string_value)
        .and_then(|y| y.parse::<i32>().ok())
        .unwrap_or(SUPPORTED_TAX_YEAR);

    Ok(CanonicalDocument {
        source_name: None,
        payer_name: first_present(&obj, PAYER_KEYS).and_then(string_value),
        recipient_tin_last4: first_present(&obj, TIN_KEYS)
            .and_then(string_value)
            .and_then(|t| last_four_digits(&t)),
        tax_year,
        extraction_source: ExtractionSource::InferredFallback,
        field_confidence,
        fields,
    })
}
