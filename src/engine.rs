//! Tax calculation engine.
//!
//! A pure function from an [`AggregateReturn`] to a [`TaxResult`]: standard
//! deduction, progressive brackets, withholding reconciliation. All money is
//! [`Decimal`]; the bracket sum is rounded once, to cents, at the end.

use crate::aggregate::AggregateReturn;
use crate::error::TaxError;
use crate::schema::FilingStatus;
use crate::tables::{Bracket, StatutoryTable};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Simplifications this engine makes. Carried on every result so no summary
/// can be read as covering more than it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assumption {
    NoSelfEmploymentTax,
    NoAlternativeMinimumTax,
    NoCredits,
    NonemployeeCompensationAsOrdinaryIncome,
}

impl Assumption {
    pub const ALL: [Assumption; 4] = [
        Assumption::NoSelfEmploymentTax,
        Assumption::NoAlternativeMinimumTax,
        Assumption::NoCredits,
        Assumption::NonemployeeCompensationAsOrdinaryIncome,
    ];
}

impl fmt::Display for Assumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Assumption::NoSelfEmploymentTax => "Self-employment tax (Schedule SE) is not computed",
            Assumption::NoAlternativeMinimumTax => "Alternative minimum tax is not computed",
            Assumption::NoCredits => "No tax credits are applied",
            Assumption::NonemployeeCompensationAsOrdinaryIncome => {
                "Nonemployee compensation is taxed as ordinary income with no business expenses"
            }
        })
    }
}

/// Federal tax computation for one return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxResult {
    pub filing_status: FilingStatus,
    pub tax_year: i32,
    pub gross_income: Decimal,
    pub standard_deduction: Decimal,
    /// `max(0, gross_income - standard_deduction)`.
    pub taxable_income: Decimal,
    pub tax_before_credits: Decimal,
    pub total_withholding: Decimal,
    /// Positive: refund. Negative: amount due.
    pub refund_or_due: Decimal,
    pub assumptions: Vec<Assumption>,
}

/// Round to cents, half away from zero.
pub fn to_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Unrounded progressive tax on `taxable`.
///
/// Σ rate × (min(taxable, next threshold) − threshold) over every bracket
/// whose threshold is below `taxable`. `None` if the sum does not fit in a
/// `Decimal`.
pub fn bracket_tax(taxable: Decimal, brackets: &[Bracket]) -> Option<Decimal> {
    brackets
        .iter()
        .enumerate()
        .take_while(|(_, b)| b.threshold < taxable)
        .try_fold(Decimal::ZERO, |acc, (i, b)| {
            let upper = brackets
                .get(i + 1)
                .map(|next| next.threshold.min(taxable))
                .unwrap_or(taxable);
            let band = upper.checked_sub(b.threshold)?;
            acc.checked_add(b.rate.checked_mul(band)?)
        })
}

/// Compute the tax result for an aggregate.
///
/// # Errors
/// * [`TaxError::NegativeTotal`] when any aggregate total is negative
/// * [`TaxError::TotalOutOfRange`] when a total or the gross income overflows
/// * [`TaxError::UnsupportedTaxYear`] when there is no table for the year
pub fn compute(aggregate: &AggregateReturn) -> Result<TaxResult, TaxError> {
    if let Some(field) = aggregate.out_of_range() {
        return Err(TaxError::TotalOutOfRange { field });
    }
    let totals = aggregate.totals();
    for (field, amount) in [
        ("total_wages", totals.wages),
        ("total_interest", totals.interest),
        ("total_nonemployee_compensation", totals.nonemployee_compensation),
        ("total_withholding", totals.withholding),
    ] {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(TaxError::NegativeTotal { field, amount });
        }
    }

    let table = StatutoryTable::for_year(aggregate.tax_year())?;
    let schedule = table.schedule(aggregate.filing_status());

    let gross_income = totals
        .wages
        .checked_add(totals.interest)
        .and_then(|sum| sum.checked_add(totals.nonemployee_compensation))
        .ok_or(TaxError::TotalOutOfRange {
            field: "gross_income",
        })?;
    let standard_deduction = schedule.standard_deduction;
    // Both operands are non-negative from here on.
    let taxable_income = (gross_income - standard_deduction).max(Decimal::ZERO);
    let tax_before_credits = bracket_tax(taxable_income, &schedule.brackets)
        .map(to_cents)
        .ok_or(TaxError::TotalOutOfRange {
            field: "tax_before_credits",
        })?;
    let refund_or_due = totals.withholding - tax_before_credits;

    debug!(
        "gross {} − deduction {} = taxable {}; tax {}; withholding {}",
        gross_income, standard_deduction, taxable_income, tax_before_credits, totals.withholding
    );

    Ok(TaxResult {
        filing_status: aggregate.filing_status(),
        tax_year: aggregate.tax_year(),
        gross_income,
        standard_deduction,
        taxable_income,
        tax_before_credits,
        total_withholding: totals.withholding,
        refund_or_due,
        assumptions: Assumption::ALL.to_vec(),
    })
}
