//! Text-layer extraction: form detection and box-value location.
//!
//! Statements printed by payroll and banking software come in two layouts:
//!
//! ```text
//! inline    1 Wages, tips, other compensation 50,000.00 2 Federal income tax withheld 6,000.00
//!
//! tabular   1 Interest income 2 Early withdrawal penalty 4 Federal income tax withheld
//!           $ 126.43 0.00 12.00
//! ```
//!
//! Inline values are read from the text between a label and the next label
//! on the same line. Tabular values are read from the next line when it is a
//! pure row of amounts, mapped by box column. Anything else stays
//! [`Amount::Unknown`]; this module never guesses a value.

use crate::error::ExtractionError;
use crate::schema::{
    Amount, CanonicalDocument, DocumentKind, ExtractionSource, Field, StatementFields,
    SUPPORTED_TAX_YEAR,
};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

/// Confidence for a value printed on the label's own line.
pub const INLINE_CONFIDENCE: f64 = 0.9;
/// Confidence for a value read from the row below a label line.
pub const VALUE_ROW_CONFIDENCE: f64 = 0.7;

/// Minimum marker score before a kind is accepted.
const MIN_KIND_SCORE: u32 = 2;
/// Weight of an explicit kind hint from the ingestion collaborator.
const HINT_WEIGHT: u32 = 2;

// ── Kind detection ───────────────────────────────────────────────────────────

struct Marker {
    kind: DocumentKind,
    weight: u32,
    pattern: Regex,
}

static MARKERS: Lazy<Vec<Marker>> = Lazy::new(|| {
    let m = |kind, weight, pattern: &str| Marker {
        kind,
        weight,
        pattern: Regex::new(pattern).unwrap(),
    };
    use DocumentKind::*;
    vec![
        m(WageStatement, 2, r"(?i)\bw-?2\b"),
        m(WageStatement, 1, r"(?i)\bwage\s+and\s+tax\s+statement\b"),
        m(WageStatement, 1, r"(?i)wages,?\s+tips,?\s+(?:and\s+)?other\s+comp"),
        m(WageStatement, 1, r"(?i)\bsocial\s+security\s+wages\b"),
        m(WageStatement, 1, r"(?i)\bmedicare\s+wages\b"),
        m(InterestStatement, 2, r"(?i)\b1099-?int\b"),
        m(InterestStatement, 1, r"(?i)\binterest\s+income\b"),
        m(InterestStatement, 1, r"(?i)\bearly\s+withdrawal\s+penalty\b"),
        m(InterestStatement, 1, r"(?i)\bsavings\s+bonds\b"),
        m(NonemployeeCompensation, 2, r"(?i)\b1099-?nec\b"),
        m(NonemployeeCompensation, 1, r"(?i)\bnonemployee\s+compensation\b"),
        m(NonemployeeCompensation, 1, r"(?i)\bdirect\s+sales\b"),
    ]
});

static RE_FORM_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:w-?2|1099-?int|1099-?nec)\b").unwrap());

/// Score every kind against the text and pick a clear winner.
///
/// Fails with [`ExtractionError::UnrecognizedDocument`] when the best score
/// is below the minimum or tied with the runner-up.
pub fn detect_kind(
    text: &str,
    hint: Option<DocumentKind>,
) -> Result<DocumentKind, ExtractionError> {
    let mut scores: BTreeMap<DocumentKind, u32> =
        DocumentKind::ALL.iter().map(|k| (*k, 0)).collect();
    for marker in MARKERS.iter() {
        if marker.pattern.is_match(text) {
            *scores.entry(marker.kind).or_default() += marker.weight;
        }
    }
    if let Some(kind) = hint {
        *scores.entry(kind).or_default() += HINT_WEIGHT;
    }

    let mut ranked: Vec<(DocumentKind, u32)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    let (best, best_score) = ranked[0];
    let runner_up = ranked[1];

    if best_score < MIN_KIND_SCORE {
        return Err(ExtractionError::UnrecognizedDocument {
            detail: format!(
                "no W-2, 1099-INT or 1099-NEC markers found (best: {} scored {})",
                best, best_score
            ),
        });
    }
    if best_score == runner_up.1 {
        return Err(ExtractionError::UnrecognizedDocument {
            detail: format!(
                "ambiguous form: {} and {} both scored {}",
                best, runner_up.0, best_score
            ),
        });
    }
    debug!("Detected {} (score {})", best, best_score);
    Ok(best)
}

// ── Money tokens ─────────────────────────────────────────────────────────────

static RE_MONEY_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\()?(-)?\$?(-)?((?:[0-9]{1,3}(?:,[0-9]{3})+)|[0-9]+)(\.[0-9]{1,2})?(\))?[.,;:]?$")
        .unwrap()
});

/// Parse one printed amount: `50,000.00`, `$126.43`, `(500.00)`, `-12`.
///
/// Negative results are returned as-is; callers decide what a negative box
/// value means.
pub fn parse_money(token: &str) -> Option<Decimal> {
    let caps = RE_MONEY_TOKEN.captures(token.trim())?;
    let parenthesised = caps.get(1).is_some();
    if parenthesised != caps.get(6).is_some() {
        return None;
    }
    let digits = caps[4].replace(',', "");
    let fraction = caps.get(5).map(|m| m.as_str()).unwrap_or("");
    let value = Decimal::from_str(&format!("{digits}{fraction}")).ok()?;
    if parenthesised || caps.get(2).is_some() || caps.get(3).is_some() {
        Some(-value)
    } else {
        Some(value)
    }
}

/// Split on whitespace, re-attaching a detached currency sign (`$ 12.00`).
fn tokens(s: &str) -> Vec<String> {
    s.replace("$ ", "$")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Box numbers: `1`, `12`, `12a` (1–20).
fn is_box_number(token: &str) -> bool {
    let digits = token.trim_end_matches(|c: char| c.is_ascii_lowercase());
    if digits.is_empty() || digits.len() + 1 < token.len() {
        return false;
    }
    digits.chars().all(|c| c.is_ascii_digit())
        && digits.parse::<u32>().is_ok_and(|n| (1..=20).contains(&n))
}

fn looks_like_year(token: &str) -> bool {
    token.len() == 4 && token.parse::<u32>().is_ok_and(|y| (1900..=2100).contains(&y))
}

/// Value printed between a label and the next label (or end of line).
fn read_segment(segment: &str) -> Option<Decimal> {
    let segment = segment.trim_start_matches([':', '.', ' ', '=']);
    let toks = tokens(segment);
    let first = toks.first()?;
    if is_box_number(first) {
        return None;
    }
    parse_money(first)
}

/// A line made only of amounts, e.g. `$ 126.43 0.00 12.00`.
fn value_row(line: &str) -> Option<Vec<Decimal>> {
    let toks = tokens(line);
    if toks.is_empty() || (toks.len() == 1 && looks_like_year(&toks[0])) {
        return None;
    }
    toks.iter().map(|t| parse_money(t)).collect()
}

// ── Field location ───────────────────────────────────────────────────────────

static LABELS: Lazy<Vec<(Field, Regex)>> = Lazy::new(|| {
    let l = |field, pattern: &str| (field, Regex::new(pattern).unwrap());
    vec![
        l(
            Field::Wages,
            r"(?i)wages,?\s+tips,?\s+(?:and\s+)?other\s+comp(?:ensation|\.)?",
        ),
        l(Field::FederalWithholding, r"(?i)federal\s+income\s+tax\s+withheld"),
        l(Field::SocialSecurityWages, r"(?i)social\s+security\s+wages"),
        l(Field::MedicareWages, r"(?i)medicare\s+wages\s+(?:and|&)\s+tips"),
        l(Field::InterestIncome, r"(?i)\binterest\s+income\b"),
        l(Field::NonemployeeCompensation, r"(?i)\bnonemployee\s+compensation\b"),
    ]
});

struct LabelHit {
    field: Field,
    start: usize,
    end: usize,
}

fn label_hits(line: &str, wanted: &[Field]) -> Vec<LabelHit> {
    let mut hits: Vec<LabelHit> = LABELS
        .iter()
        .filter(|(field, _)| wanted.contains(field))
        .flat_map(|(field, re)| {
            re.find_iter(line).map(move |m| LabelHit {
                field: *field,
                start: m.start(),
                end: m.end(),
            })
        })
        .collect();
    hits.sort_by_key(|h| h.start);
    hits
}

/// Column of a label in a tabular header: how many box numbers precede it.
fn box_column(line: &str, hit: &LabelHit) -> Option<usize> {
    let preceding = line[..hit.start]
        .split_whitespace()
        .filter(|t| is_box_number(t))
        .count();
    preceding.checked_sub(1)
}

/// Locate every field of `kind` in `lines`. First located value wins.
fn locate_fields(lines: &[&str], kind: DocumentKind) -> BTreeMap<Field, (Decimal, f64)> {
    let wanted = kind.fields();
    let mut found: BTreeMap<Field, (Decimal, f64)> = BTreeMap::new();

    for (i, line) in lines.iter().enumerate() {
        let hits = label_hits(line, wanted);
        if hits.is_empty() {
            continue;
        }

        let mut unresolved: Vec<usize> = Vec::new();
        for (j, hit) in hits.iter().enumerate() {
            let seg_end = hits.get(j + 1).map(|h| h.start).unwrap_or(line.len());
            let segment = if hit.end <= seg_end {
                &line[hit.end..seg_end]
            } else {
                ""
            };
            match read_segment(segment) {
                Some(v) => {
                    found.entry(hit.field).or_insert((v, INLINE_CONFIDENCE));
                }
                None => unresolved.push(j),
            }
        }

        // Title lines ("Form 1099-INT Interest Income") never own a value row.
        if unresolved.is_empty() || RE_FORM_ID.is_match(line) {
            continue;
        }
        let Some(values) = lines[i + 1..]
            .iter()
            .find(|l| !l.trim().is_empty())
            .and_then(|l| value_row(l))
        else {
            continue;
        };

        let columns = line
            .split_whitespace()
            .filter(|t| is_box_number(t))
            .count();
        for (k, j) in unresolved.iter().enumerate() {
            let hit = &hits[*j];
            let value = if columns == values.len() {
                box_column(line, hit).and_then(|c| values.get(c))
            } else if hits.len() == values.len() {
                values.get(*j)
            } else if unresolved.len() == values.len() {
                values.get(k)
            } else {
                None
            };
            if let Some(v) = value {
                found.entry(hit.field).or_insert((*v, VALUE_ROW_CONFIDENCE));
            }
        }
    }

    found
}

// ── Document metadata ────────────────────────────────────────────────────────

static RE_PAYER_NAMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:payer|employer)(?:'s|’s)?\s+name\b[^:\n]*:\s*(\S.*?)\s*$").unwrap()
});
static RE_PAYER_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*(?:payer|employer)\s*:\s*(\S.*?)\s*$").unwrap());

static RE_TIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:recipient|employee)(?:'s|’s)?\s+(?:tin|ssn|social\s+security\s+number|identification\s+number)[^0-9xX*\n]{0,40}[0-9xX*]{3}-?[0-9xX*]{2}-?([0-9]{4})\b",
    )
    .unwrap()
});
static RE_MASKED_SSN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:xxx|\*\*\*)-?(?:xx|\*\*)-?([0-9]{4})\b").unwrap()
});

static RE_YEAR_LABELLED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:tax|calendar|for)\s+year\s*:?\s*(20[0-9]{2})\b").unwrap()
});
static RE_YEAR_AFTER_FORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:w-?2|1099-?int|1099-?nec)\b[^0-9\n]{0,40}(20[0-9]{2})\b").unwrap()
});
static RE_YEAR_BEFORE_FORM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(20[0-9]{2})\s+form\b").unwrap());

const MAX_PAYER_LEN: usize = 100;

fn payer_name(text: &str) -> Option<String> {
    let caps = RE_PAYER_NAMED
        .captures(text)
        .or_else(|| RE_PAYER_BARE.captures(text))?;
    let name: String = caps[1].chars().take(MAX_PAYER_LEN).collect();
    Some(name)
}

fn tin_last4(text: &str) -> Option<String> {
    RE_TIN
        .captures(text)
        .or_else(|| RE_MASKED_SSN.captures(text))
        .map(|c| c[1].to_string())
}

fn tax_year(text: &str) -> Option<i32> {
    [&*RE_YEAR_LABELLED, &*RE_YEAR_AFTER_FORM, &*RE_YEAR_BEFORE_FORM]
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|c| c[1].parse().ok())
}

// ── Entry point ──────────────────────────────────────────────────────────────

/// Extract a canonical document from a cleaned text layer.
pub fn extract_text_layer(
    text: &str,
    hint: Option<DocumentKind>,
) -> Result<CanonicalDocument, ExtractionError> {
    let kind = detect_kind(text, hint)?;
    let lines: Vec<&str> = text.lines().collect();
    let located = locate_fields(&lines, kind);

    let mut fields = StatementFields::unresolved(kind);
    let mut field_confidence = BTreeMap::new();
    for field in kind.fields() {
        let (amount, confidence) = match located.get(field) {
            Some((value, conf)) => match Amount::from_box(*value) {
                Amount::Unknown => {
                    debug!("{}: implausible value {} treated as unknown", field, value);
                    (Amount::Unknown, 0.0)
                }
                known => (known, *conf),
            },
            None => {
                debug!("{}: not located in text layer", field);
                (Amount::Unknown, 0.0)
            }
        };
        fields.set(*field, amount);
        field_confidence.insert(*field, confidence);
    }

    Ok(CanonicalDocument {
        source_name: None,
        payer_name: payer_name(text),
        recipient_tin_last4: tin_last4(text),
        tax_year: tax_year(text).unwrap_or(SUPPORTED_TAX_YEAR),
        extraction_source: ExtractionSource::TextLayer,
        field_confidence,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    const W2_INLINE: &str = "Form W-2 Wage and Tax Statement 2024\n\
Employer's name, address, and ZIP code: Acme Corp\n\
Employee's social security number: XXX-XX-1234\n\
1 Wages, tips, other compensation 50,000.00 2 Federal income tax withheld 6,000.00\n\
3 Social security wages 50,000.00 4 Social security tax withheld 3,100.00\n\
5 Medicare wages and tips 50,000.00 6 Medicare tax withheld 725.00";

    const INT_TABULAR: &str = "Form 1099-INT Interest Income\n\
PAYER'S name: First National Bank\n\
RECIPIENT'S TIN: ***-**-9876\n\
1 Interest income 2 Early withdrawal penalty 4 Federal income tax withheld\n\
$ 126.43 0.00 12.00";

    #[test]
    fn test_parse_money() {
        assert_eq!(parse_money("50,000.00"), Some(dec("50000.00")));
        assert_eq!(parse_money("$126.43"), Some(dec("126.43")));
        assert_eq!(parse_money("(500.00)"), Some(dec("-500.00")));
        assert_eq!(parse_money("-12"), Some(dec("-12")));
        assert_eq!(parse_money("1,234.5,"), Some(dec("1234.5")));
        assert_eq!(parse_money("5O,000"), None);
        assert_eq!(parse_money("12,34"), None);
        assert_eq!(parse_money("(500.00"), None);
        assert_eq!(parse_money("N/A"), None);
    }

    #[test]
    fn test_box_numbers() {
        assert!(is_box_number("1"));
        assert!(is_box_number("12a"));
        assert!(!is_box_number("21"));
        assert!(!is_box_number("0"));
        assert!(!is_box_number("6,000.00"));
        assert!(!is_box_number("a"));
    }

    #[test]
    fn test_detect_w2() {
        assert_eq!(
            detect_kind(W2_INLINE, None).unwrap(),
            DocumentKind::WageStatement
        );
    }

    #[test]
    fn test_detect_unrecognized() {
        let err = detect_kind("Quarterly newsletter\nDividends: 12.00", None).unwrap_err();
        assert!(matches!(err, ExtractionError::UnrecognizedDocument { .. }));
    }

    #[test]
    fn test_single_weak_marker_is_not_enough() {
        // One label alone scores 1, below the minimum.
        let err = detect_kind("Interest income 12.00", None).unwrap_err();
        assert!(matches!(err, ExtractionError::UnrecognizedDocument { .. }));
        // The same text with a declared hint is accepted.
        assert_eq!(
            detect_kind("Interest income 12.00", Some(DocumentKind::InterestStatement)).unwrap(),
            DocumentKind::InterestStatement
        );
    }

    #[test]
    fn test_ambiguous_kind() {
        let err = detect_kind("Form W-2 and Form 1099-NEC combined", None).unwrap_err();
        match err {
            ExtractionError::UnrecognizedDocument { detail } => {
                assert!(detail.contains("ambiguous"), "got: {detail}")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_inline_w2() {
        let doc = extract_text_layer(W2_INLINE, None).unwrap();
        assert_eq!(doc.kind(), DocumentKind::WageStatement);
        assert_eq!(doc.amount(Field::Wages), Amount::Known(dec("50000.00")));
        assert_eq!(
            doc.amount(Field::FederalWithholding),
            Amount::Known(dec("6000.00"))
        );
        assert_eq!(
            doc.amount(Field::SocialSecurityWages),
            Amount::Known(dec("50000.00"))
        );
        assert_eq!(doc.amount(Field::MedicareWages), Amount::Known(dec("50000.00")));
        assert_eq!(doc.confidence(Field::Wages), INLINE_CONFIDENCE);
        assert_eq!(doc.payer_name.as_deref(), Some("Acme Corp"));
        assert_eq!(doc.recipient_tin_last4.as_deref(), Some("1234"));
        assert_eq!(doc.tax_year, 2024);
        assert_eq!(doc.extraction_source, ExtractionSource::TextLayer);
    }

    #[test]
    fn test_tabular_1099_int() {
        let doc = extract_text_layer(INT_TABULAR, None).unwrap();
        assert_eq!(doc.kind(), DocumentKind::InterestStatement);
        assert_eq!(
            doc.amount(Field::InterestIncome),
            Amount::Known(dec("126.43"))
        );
        assert_eq!(
            doc.amount(Field::FederalWithholding),
            Amount::Known(dec("12.00"))
        );
        assert_eq!(doc.confidence(Field::InterestIncome), VALUE_ROW_CONFIDENCE);
        assert_eq!(doc.payer_name.as_deref(), Some("First National Bank"));
        assert_eq!(doc.recipient_tin_last4.as_deref(), Some("9876"));
    }

    #[test]
    fn test_missing_field_is_unknown_with_zero_confidence() {
        let text = "Form 1099-NEC Nonemployee Compensation\n\
PAYER'S name: Freelance Client LLC\n\
1 Nonemployee compensation $8,200.00";
        let doc = extract_text_layer(text, None).unwrap();
        assert_eq!(
            doc.amount(Field::NonemployeeCompensation),
            Amount::Known(dec("8200.00"))
        );
        assert_eq!(doc.amount(Field::FederalWithholding), Amount::Unknown);
        assert_eq!(doc.confidence(Field::FederalWithholding), 0.0);
        assert_eq!(doc.unknown_fields(), vec![Field::FederalWithholding]);
    }

    #[test]
    fn test_unparseable_value_is_unknown() {
        let text = "Form W-2\n1 Wages, tips, other compensation 5O,OOO.OO";
        let doc = extract_text_layer(text, None).unwrap();
        assert_eq!(doc.amount(Field::Wages), Amount::Unknown);
        assert_eq!(doc.confidence(Field::Wages), 0.0);
    }

    #[test]
    fn test_negative_value_is_unknown() {
        let text = "Form W-2\n1 Wages, tips, other compensation (1,000.00)";
        let doc = extract_text_layer(text, None).unwrap();
        assert_eq!(doc.amount(Field::Wages), Amount::Unknown);
    }

    #[test]
    fn test_oversized_value_is_unknown() {
        let text = "Form W-2\n1 Wages, tips, other compensation 79228162514264337593543950335\n\
2 Federal income tax withheld 6,000.00";
        let doc = extract_text_layer(text, None).unwrap();
        assert_eq!(doc.amount(Field::Wages), Amount::Unknown);
        assert_eq!(doc.confidence(Field::Wages), 0.0);
        assert_eq!(
            doc.amount(Field::FederalWithholding),
            Amount::Known(dec("6000.00"))
        );
    }

    #[test]
    fn test_title_line_year_is_not_a_value() {
        let text = "Form 1099-NEC Nonemployee Compensation\n2024\nPAYER: Studio";
        let doc = extract_text_layer(text, None).unwrap();
        assert_eq!(doc.amount(Field::NonemployeeCompensation), Amount::Unknown);
        assert_eq!(doc.payer_name.as_deref(), Some("Studio"));
    }

    #[test]
    fn test_tax_year_from_label() {
        let text = "Form W-2\nTax year: 2023\n1 Wages, tips, other compensation 10.00";
        let doc = extract_text_layer(text, None).unwrap();
        assert_eq!(doc.tax_year, 2023);
    }

    #[test]
    fn test_tax_year_defaults_when_absent() {
        let text = "W2\nWages, tips, other compensation: $1,000.00";
        let doc = extract_text_layer(text, None).unwrap();
        assert_eq!(doc.tax_year, SUPPORTED_TAX_YEAR);
        assert_eq!(doc.amount(Field::Wages), Amount::Known(dec("1000.00")));
    }
}
