//! Statutory tables: standard deduction and marginal brackets.
//!
//! Tables are plain immutable data built once on first use. Supporting a
//! new year means adding a table here and registering it in
//! [`StatutoryTable::for_year`]; the engine logic does not change.

use crate::error::TaxError;
use crate::schema::{FilingStatus, SUPPORTED_TAX_YEAR};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;

/// One marginal bracket: income above `threshold` (up to the next bracket's
/// threshold) is taxed at `rate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bracket {
    pub threshold: Decimal,
    pub rate: Decimal,
}

/// Standard deduction and brackets for one filing status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSchedule {
    pub standard_deduction: Decimal,
    /// Ordered by ascending threshold; the first threshold is zero.
    pub brackets: Vec<Bracket>,
}

/// All schedules for one tax year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatutoryTable {
    pub year: i32,
    single: StatusSchedule,
    married_filing_jointly: StatusSchedule,
    married_filing_separately: StatusSchedule,
    head_of_household: StatusSchedule,
}

impl StatutoryTable {
    /// Table for `year`, or [`TaxError::UnsupportedTaxYear`].
    pub fn for_year(year: i32) -> Result<&'static StatutoryTable, TaxError> {
        if year == SUPPORTED_TAX_YEAR {
            Ok(Lazy::force(&TABLE_2024))
        } else {
            Err(TaxError::UnsupportedTaxYear {
                year,
                supported: SUPPORTED_TAX_YEAR,
            })
        }
    }

    pub fn schedule(&self, status: FilingStatus) -> &StatusSchedule {
        match status {
            FilingStatus::Single => &self.single,
            FilingStatus::MarriedFilingJointly => &self.married_filing_jointly,
            FilingStatus::MarriedFilingSeparately => &self.married_filing_separately,
            FilingStatus::HeadOfHousehold => &self.head_of_household,
        }
    }
}

/// 2024 marginal rates, in percent, shared by every filing status.
const RATES_2024: [i64; 7] = [10, 12, 22, 24, 32, 35, 37];

fn schedule(standard_deduction: i64, thresholds: [i64; 7]) -> StatusSchedule {
    StatusSchedule {
        standard_deduction: Decimal::from(standard_deduction),
        brackets: thresholds
            .iter()
            .zip(RATES_2024.iter())
            .map(|(t, r)| Bracket {
                threshold: Decimal::from(*t),
                rate: Decimal::new(*r, 2),
            })
            .collect(),
    }
}

/// IRS Rev. Proc. 2023-34 figures for tax year 2024.
static TABLE_2024: Lazy<StatutoryTable> = Lazy::new(|| StatutoryTable {
    year: 2024,
    single: schedule(
        14_600,
        [0, 11_600, 47_150, 100_525, 191_950, 243_725, 609_350],
    ),
    married_filing_jointly: schedule(
        29_200,
        [0, 23_200, 94_300, 201_050, 383_900, 487_450, 731_200],
    ),
    married_filing_separately: schedule(
        14_600,
        [0, 11_600, 47_150, 100_525, 191_950, 243_725, 365_600],
    ),
    head_of_household: schedule(
        21_900,
        [0, 16_550, 63_100, 100_500, 191_950, 243_700, 609_350],
    ),
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_2024_is_supported() {
        assert!(StatutoryTable::for_year(2024).is_ok());
        let err = StatutoryTable::for_year(2023).unwrap_err();
        assert!(matches!(err, TaxError::UnsupportedTaxYear { year: 2023, .. }));
    }

    #[test]
    fn brackets_are_ascending_from_zero() {
        let table = StatutoryTable::for_year(2024).unwrap();
        for status in FilingStatus::ALL {
            let brackets = &table.schedule(status).brackets;
            assert_eq!(brackets[0].threshold, Decimal::ZERO);
            assert!(brackets.windows(2).all(|w| w[0].threshold < w[1].threshold));
            assert!(brackets.windows(2).all(|w| w[0].rate < w[1].rate));
        }
    }

    #[test]
    fn standard_deductions() {
        let table = StatutoryTable::for_year(2024).unwrap();
        let sd = |s| table.schedule(s).standard_deduction;
        assert_eq!(sd(FilingStatus::Single), Decimal::from(14_600));
        assert_eq!(sd(FilingStatus::MarriedFilingJointly), Decimal::from(29_200));
        assert_eq!(sd(FilingStatus::MarriedFilingSeparately), Decimal::from(14_600));
        assert_eq!(sd(FilingStatus::HeadOfHousehold), Decimal::from(21_900));
    }
}
