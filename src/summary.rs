//! Return summary: maps a computed return onto Form 1040 lines.
//!
//! This is a pure mapping. Every number here already exists on the
//! [`AggregateReturn`] or [`TaxResult`]; the only decision made is whether
//! `refund_or_due` is shown as a refund or as an amount owed.

use crate::aggregate::{AggregateReturn, MissingField, Warning};
use crate::engine::{Assumption, TaxResult};
use crate::error::DocumentError;
use crate::schema::FilingStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One Form 1040 line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Form 1040 line identifier, e.g. `"1a"`, `"25d"`.
    pub line: String,
    pub label: String,
    pub amount: Decimal,
}

/// Bottom line of the return. Never a negative refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "amount", rename_all = "snake_case")]
pub enum Outcome {
    Refund(Decimal),
    AmountDue(Decimal),
    Even,
}

impl Outcome {
    /// Positive = refund, negative = amount due.
    pub fn from_refund_or_due(refund_or_due: Decimal) -> Self {
        if refund_or_due.is_zero() {
            Outcome::Even
        } else if refund_or_due.is_sign_positive() {
            Outcome::Refund(refund_or_due)
        } else {
            Outcome::AmountDue(-refund_or_due)
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Refund(x) => write!(f, "Refund: ${}", money(*x)),
            Outcome::AmountDue(y) => write!(f, "Amount Due: ${}", money(*y)),
            Outcome::Even => f.write_str("Refund: $0.00"),
        }
    }
}

/// `1234.5` → `1,234.50`.
pub fn money(value: Decimal) -> String {
    let rounded = crate::engine::to_cents(value.abs());
    let text = format!("{:.2}", rounded);
    let (whole, cents) = text.split_once('.').unwrap_or((&text, "00"));
    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{sign}{grouped}.{cents}")
}

/// Everything an external renderer needs to lay out the return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSummary {
    pub tax_year: i32,
    pub filing_status: FilingStatus,
    pub line_items: Vec<LineItem>,
    pub outcome: Outcome,
    pub warnings: Vec<Warning>,
    pub missing_fields: Vec<MissingField>,
    pub failed_documents: Vec<DocumentError>,
    pub assumptions: Vec<Assumption>,
    pub document_count: usize,
}

impl ReturnSummary {
    /// Amount on `line`, if present.
    pub fn line(&self, line: &str) -> Option<Decimal> {
        self.line_items
            .iter()
            .find(|l| l.line == line)
            .map(|l| l.amount)
    }
}

/// Map an aggregate and its tax result onto Form 1040 lines.
pub fn build(aggregate: &AggregateReturn, tax: &TaxResult) -> ReturnSummary {
    let totals = aggregate.totals();
    let outcome = Outcome::from_refund_or_due(tax.refund_or_due);
    let (overpaid, owed) = match outcome {
        Outcome::Refund(x) => (x, Decimal::ZERO),
        Outcome::AmountDue(y) => (Decimal::ZERO, y),
        Outcome::Even => (Decimal::ZERO, Decimal::ZERO),
    };

    let item = |line: &str, label: &str, amount: Decimal| LineItem {
        line: line.to_string(),
        label: label.to_string(),
        amount,
    };
    let line_items = vec![
        item("1a", "Wages (Form W-2, box 1)", totals.wages),
        item("2b", "Taxable interest", totals.interest),
        item(
            "8",
            "Additional income from Schedule 1 (nonemployee compensation)",
            totals.nonemployee_compensation,
        ),
        item("9", "Total income", tax.gross_income),
        item("12", "Standard deduction", tax.standard_deduction),
        item("15", "Taxable income", tax.taxable_income),
        item("16", "Tax", tax.tax_before_credits),
        item("24", "Total tax", tax.tax_before_credits),
        item("25d", "Federal income tax withheld", tax.total_withholding),
        item("33", "Total payments", tax.total_withholding),
        item("34", "Amount overpaid", overpaid),
        item("35a", "Refunded to you", overpaid),
        item("37", "Amount you owe", owed),
    ];

    ReturnSummary {
        tax_year: tax.tax_year,
        filing_status: tax.filing_status,
        line_items,
        outcome,
        warnings: aggregate.warnings().to_vec(),
        missing_fields: aggregate.missing_fields().to_vec(),
        failed_documents: aggregate.failed_documents().to_vec(),
        assumptions: tax.assumptions.clone(),
        document_count: aggregate.documents().len(),
    }
}

impl fmt::Display for ReturnSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Form 1040 summary: tax year {}", self.tax_year)?;
        writeln!(f, "Filing status: {}", self.filing_status)?;
        writeln!(f, "Documents: {}", self.document_count)?;
        writeln!(f)?;
        for item in &self.line_items {
            writeln!(
                f,
                "  {:>4}  {:<62} {:>14}",
                item.line,
                item.label,
                money(item.amount)
            )?;
        }
        writeln!(f)?;
        writeln!(f, "{}", self.outcome)?;

        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Warnings ({}):", self.warnings.len())?;
            for w in &self.warnings {
                writeln!(f, "  - {}", w)?;
            }
        }
        writeln!(f)?;
        writeln!(f, "Assumptions:")?;
        for a in &self.assumptions {
            writeln!(f, "  - {}", a)?;
        }
        Ok(())
    }
}
