//! Canonical document schema.
//!
//! Every supported statement, whatever its origin (a clean text layer or a
//! JSON blob from fallback inference), is normalised into one
//! [`CanonicalDocument`]. Monetary fields are [`Amount`]s: either a known,
//! non-negative [`Decimal`] or the explicit [`Amount::Unknown`] marker. Zero
//! is a real value here; "extraction failed" is never spelled `0`.

use crate::error::TaxError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The single statutory year this crate models.
pub const SUPPORTED_TAX_YEAR: i32 = 2024;

/// Largest box value accepted as real: one quadrillion dollars. Anything
/// above it is a misread, and summing such values could overflow.
pub const MAX_BOX_AMOUNT: Decimal = Decimal::from_parts(0xA4C6_8000, 0x0003_8D7E, 0, false, 0);

/// Category of income document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentKind {
    /// Form W-2.
    WageStatement,
    /// Form 1099-INT.
    InterestStatement,
    /// Form 1099-NEC.
    NonemployeeCompensation,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [
        DocumentKind::WageStatement,
        DocumentKind::InterestStatement,
        DocumentKind::NonemployeeCompensation,
    ];

    /// IRS form identifier.
    pub fn form_name(&self) -> &'static str {
        match self {
            DocumentKind::WageStatement => "W-2",
            DocumentKind::InterestStatement => "1099-INT",
            DocumentKind::NonemployeeCompensation => "1099-NEC",
        }
    }

    /// Monetary fields carried by this kind, in box order.
    pub fn fields(&self) -> &'static [Field] {
        match self {
            DocumentKind::WageStatement => &[
                Field::Wages,
                Field::FederalWithholding,
                Field::SocialSecurityWages,
                Field::MedicareWages,
            ],
            DocumentKind::InterestStatement => &[Field::InterestIncome, Field::FederalWithholding],
            DocumentKind::NonemployeeCompensation => {
                &[Field::NonemployeeCompensation, Field::FederalWithholding]
            }
        }
    }

    /// Interpret a loose kind hint ("W-2", "form_1099_int", "interest", …).
    pub fn from_hint(hint: &str) -> Option<Self> {
        let key: String = hint
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        let key = key.strip_prefix("form").unwrap_or(&key);
        match key {
            "w2" | "wage" | "wages" | "wagestatement" | "wageandtaxstatement" => {
                Some(DocumentKind::WageStatement)
            }
            "1099int" | "int" | "interest" | "interestincome" | "intereststatement" => {
                Some(DocumentKind::InterestStatement)
            }
            "1099nec" | "nec" | "nonemployee" | "nonemployeecompensation" => {
                Some(DocumentKind::NonemployeeCompensation)
            }
            _ => None,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.form_name())
    }
}

/// Where a document's values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    /// Parsed from the document's own text layer.
    TextLayer,
    /// Validated from JSON produced by fallback inference (scanned input).
    InferredFallback,
}

/// A monetary field of a canonical document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Wages,
    FederalWithholding,
    SocialSecurityWages,
    MedicareWages,
    InterestIncome,
    NonemployeeCompensation,
}

impl Field {
    /// Stable snake_case key, matching the serde name.
    pub fn key(&self) -> &'static str {
        match self {
            Field::Wages => "wages",
            Field::FederalWithholding => "federal_withholding",
            Field::SocialSecurityWages => "social_security_wages",
            Field::MedicareWages => "medicare_wages",
            Field::InterestIncome => "interest_income",
            Field::NonemployeeCompensation => "nonemployee_compensation",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A monetary value that may not have been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amount {
    Known(Decimal),
    #[default]
    Unknown,
}

impl Amount {
    /// Wrap a parsed box value. Negatives and values above
    /// [`MAX_BOX_AMOUNT`] are extraction failures, not real amounts.
    pub fn from_box(value: Decimal) -> Self {
        if (value.is_sign_negative() && !value.is_zero()) || value > MAX_BOX_AMOUNT {
            Amount::Unknown
        } else {
            Amount::Known(value)
        }
    }

    pub fn known(&self) -> Option<Decimal> {
        match self {
            Amount::Known(v) => Some(*v),
            Amount::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Amount::Unknown)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Known(v) => write!(f, "{v}"),
            Amount::Unknown => f.write_str("unknown"),
        }
    }
}

/// W-2 boxes 1, 2, 3 and 5.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WageFields {
    pub wages: Amount,
    pub federal_withholding: Amount,
    pub social_security_wages: Amount,
    pub medicare_wages: Amount,
}

/// 1099-INT boxes 1 and 4.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InterestFields {
    pub interest_income: Amount,
    pub federal_withholding: Amount,
}

/// 1099-NEC boxes 1 and 4.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NonemployeeFields {
    pub nonemployee_compensation: Amount,
    pub federal_withholding: Amount,
}

/// Kind-specific monetary fields; the variant is the document kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StatementFields {
    WageStatement(WageFields),
    InterestStatement(InterestFields),
    NonemployeeCompensation(NonemployeeFields),
}

impl StatementFields {
    /// All fields of `kind` set to [`Amount::Unknown`].
    pub fn unresolved(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::WageStatement => StatementFields::WageStatement(WageFields::default()),
            DocumentKind::InterestStatement => {
                StatementFields::InterestStatement(InterestFields::default())
            }
            DocumentKind::NonemployeeCompensation => {
                StatementFields::NonemployeeCompensation(NonemployeeFields::default())
            }
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            StatementFields::WageStatement(_) => DocumentKind::WageStatement,
            StatementFields::InterestStatement(_) => DocumentKind::InterestStatement,
            StatementFields::NonemployeeCompensation(_) => DocumentKind::NonemployeeCompensation,
        }
    }

    /// Value of `field`, or `None` when the field does not belong to this kind.
    pub fn get(&self, field: Field) -> Option<Amount> {
        match (self, field) {
            (StatementFields::WageStatement(w), Field::Wages) => Some(w.wages),
            (StatementFields::WageStatement(w), Field::FederalWithholding) => {
                Some(w.federal_withholding)
            }
            (StatementFields::WageStatement(w), Field::SocialSecurityWages) => {
                Some(w.social_security_wages)
            }
            (StatementFields::WageStatement(w), Field::MedicareWages) => Some(w.medicare_wages),
            (StatementFields::InterestStatement(i), Field::InterestIncome) => {
                Some(i.interest_income)
            }
            (StatementFields::InterestStatement(i), Field::FederalWithholding) => {
                Some(i.federal_withholding)
            }
            (StatementFields::NonemployeeCompensation(n), Field::NonemployeeCompensation) => {
                Some(n.nonemployee_compensation)
            }
            (StatementFields::NonemployeeCompensation(n), Field::FederalWithholding) => {
                Some(n.federal_withholding)
            }
            _ => None,
        }
    }

    /// Set `field`; returns `false` when the field does not belong to this kind.
    pub(crate) fn set(&mut self, field: Field, value: Amount) -> bool {
        let slot = match (self, field) {
            (StatementFields::WageStatement(w), Field::Wages) => &mut w.wages,
            (StatementFields::WageStatement(w), Field::FederalWithholding) => {
                &mut w.federal_withholding
            }
            (StatementFields::WageStatement(w), Field::SocialSecurityWages) => {
                &mut w.social_security_wages
            }
            (StatementFields::WageStatement(w), Field::MedicareWages) => &mut w.medicare_wages,
            (StatementFields::InterestStatement(i), Field::InterestIncome) => {
                &mut i.interest_income
            }
            (StatementFields::InterestStatement(i), Field::FederalWithholding) => {
                &mut i.federal_withholding
            }
            (StatementFields::NonemployeeCompensation(n), Field::NonemployeeCompensation) => {
                &mut n.nonemployee_compensation
            }
            (StatementFields::NonemployeeCompensation(n), Field::FederalWithholding) => {
                &mut n.federal_withholding
            }
            _ => return false,
        };
        *slot = value;
        true
    }
}

/// Normalised, typed representation of one source tax document.
///
/// Created once by the extractor and never mutated afterwards; the
/// aggregator and summary builder only ever borrow it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    /// Upload name, for provenance in warnings. `None` when extracted directly.
    pub source_name: Option<String>,
    pub payer_name: Option<String>,
    pub recipient_tin_last4: Option<String>,
    pub tax_year: i32,
    pub extraction_source: ExtractionSource,
    /// Advisory per-field confidence in `0.0..=1.0`; `0.0` for unknown fields.
    pub field_confidence: BTreeMap<Field, f64>,
    pub fields: StatementFields,
}

impl CanonicalDocument {
    pub fn kind(&self) -> DocumentKind {
        self.fields.kind()
    }

    /// Value of `field`; [`Amount::Unknown`] for fields outside this kind.
    pub fn amount(&self, field: Field) -> Amount {
        self.fields.get(field).unwrap_or(Amount::Unknown)
    }

    pub fn confidence(&self, field: Field) -> f64 {
        self.field_confidence.get(&field).copied().unwrap_or(0.0)
    }

    /// Fields of this document's kind that were not resolved.
    pub fn unknown_fields(&self) -> Vec<Field> {
        self.kind()
            .fields()
            .iter()
            .copied()
            .filter(|f| self.amount(*f).is_unknown())
            .collect()
    }

    /// Name used in warnings: the upload name, else payer + form.
    pub fn display_name(&self) -> String {
        match (&self.source_name, &self.payer_name) {
            (Some(name), _) => name.clone(),
            (None, Some(payer)) => format!("{} from {}", self.kind().form_name(), payer),
            (None, None) => self.kind().form_name().to_string(),
        }
    }

    /// Attach the upload name. Used by the batch driver right after extraction.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }
}

/// Filing status. Always an explicit input; never inferred from documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    Single,
    MarriedFilingJointly,
    MarriedFilingSeparately,
    HeadOfHousehold,
}

impl FilingStatus {
    pub const ALL: [FilingStatus; 4] = [
        FilingStatus::Single,
        FilingStatus::MarriedFilingJointly,
        FilingStatus::MarriedFilingSeparately,
        FilingStatus::HeadOfHousehold,
    ];
}

impl FromStr for FilingStatus {
    type Err = TaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match key.as_str() {
            "single" | "s" => Ok(FilingStatus::Single),
            "married_filing_jointly" | "mfj" | "joint" => Ok(FilingStatus::MarriedFilingJointly),
            "married_filing_separately" | "mfs" | "separate" => {
                Ok(FilingStatus::MarriedFilingSeparately)
            }
            "head_of_household" | "hoh" => Ok(FilingStatus::HeadOfHousehold),
            _ => Err(TaxError::UnknownFilingStatus {
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for FilingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilingStatus::Single => "Single",
            FilingStatus::MarriedFilingJointly => "Married filing jointly",
            FilingStatus::MarriedFilingSeparately => "Married filing separately",
            FilingStatus::HeadOfHousehold => "Head of household",
        })
    }
}
