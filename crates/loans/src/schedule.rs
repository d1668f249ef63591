//! Flat-interest amortization schedule.
//!
//! Interest is computed once on the original principal and spread evenly
//! across the term; it is never recalculated on the declining balance.

use chrono::{Months, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use coop_core::money::{MONEY_SCALE, checked_add_money, out_of_range, round_money, round_rate};
use coop_core::{DomainError, DomainResult};

/// How per-installment rounding residue is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleRounding {
    /// Every row rounded on its own; the row sums may drift from the totals
    /// by a few cents.
    Independent,
    /// Rows 1..T-1 rounded on their own, the last row takes the residue so
    /// principal and interest sum exactly to the loan totals.
    #[default]
    BalanceFinalInstallment,
}

impl core::str::FromStr for ScheduleRounding {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "independent" => Ok(Self::Independent),
            "balance_final_installment" => Ok(Self::BalanceFinalInstallment),
            other => Err(DomainError::invalid_argument(format!(
                "unknown schedule rounding '{other}'"
            ))),
        }
    }
}

/// One scheduled installment with its cumulative coverage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub installment_number: u32,
    pub due_date: NaiveDate,
    pub principal_due: Decimal,
    pub interest_due: Decimal,
    pub total_due: Decimal,
    pub principal_paid: Decimal,
    pub interest_paid: Decimal,
    pub paid: bool,
}

impl Installment {
    pub fn principal_outstanding(&self) -> Decimal {
        (self.principal_due - self.principal_paid).max(Decimal::ZERO)
    }

    pub fn interest_outstanding(&self) -> Decimal {
        (self.interest_due - self.interest_paid).max(Decimal::ZERO)
    }

    /// True once both components are covered by all payments so far.
    pub fn is_covered(&self) -> bool {
        self.principal_outstanding().is_zero() && self.interest_outstanding().is_zero()
    }
}

/// Per-row amount and final-row amount for a total spread over `term` rows.
///
/// Rows are rounded half-up; when that would overshoot the rounded total the
/// rows are truncated instead, so the final row never goes negative.
fn split_with_residue(exact_total: Decimal, term: u32) -> (Decimal, Decimal) {
    let total = round_money(exact_total);
    let prior = Decimal::from(term - 1);
    let per_row = round_money(exact_total / Decimal::from(term));
    let last = total - per_row * prior;
    if last >= Decimal::ZERO {
        return (per_row, last);
    }
    let per_row = (exact_total / Decimal::from(term))
        .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::ToZero);
    (per_row, total - per_row * prior)
}

/// `annualRatePercent / 100 / 12`, each step rounded to rate precision.
pub fn monthly_rate(annual_rate_percent: Decimal) -> Decimal {
    round_rate(round_rate(annual_rate_percent / Decimal::ONE_HUNDRED) / Decimal::from(12))
}

/// `principal × monthlyRate × termMonths`, unrounded.
///
/// Fails with InvalidArgument when the product does not fit a `Decimal`.
pub fn total_interest(
    principal: Decimal,
    annual_rate_percent: Decimal,
    term_months: u32,
) -> DomainResult<Decimal> {
    principal
        .checked_mul(monthly_rate(annual_rate_percent))
        .and_then(|per_month| per_month.checked_mul(Decimal::from(term_months)))
        .ok_or_else(|| out_of_range("total interest"))
}

/// Generate `term_months` unpaid rows; installment `i` falls due `i` calendar
/// months after `disbursement_date`.
pub fn generate_schedule(
    principal: Decimal,
    annual_rate_percent: Decimal,
    term_months: u32,
    disbursement_date: NaiveDate,
    rounding: ScheduleRounding,
) -> DomainResult<Vec<Installment>> {
    if term_months == 0 {
        return Err(DomainError::invalid_argument("term must be at least one month"));
    }

    let term = Decimal::from(term_months);
    let interest_total = total_interest(principal, annual_rate_percent, term_months)?;
    let total_due = checked_add_money(principal, interest_total, "total repayable")?;

    let installment_amount = round_money(total_due / term);
    let (principal_per_month, principal_last) = match rounding {
        ScheduleRounding::Independent => (round_money(principal / term), round_money(principal / term)),
        ScheduleRounding::BalanceFinalInstallment => split_with_residue(principal, term_months),
    };
    let (interest_per_month, interest_last) = match rounding {
        ScheduleRounding::Independent => {
            (round_money(interest_total / term), round_money(interest_total / term))
        }
        ScheduleRounding::BalanceFinalInstallment => split_with_residue(interest_total, term_months),
    };

    let mut rows = Vec::with_capacity(term_months as usize);
    for number in 1..=term_months {
        let due_date = disbursement_date
            .checked_add_months(Months::new(number))
            .ok_or_else(|| DomainError::invalid_argument("installment due date out of range"))?;

        let (principal_due, interest_due) = if number == term_months {
            (principal_last, interest_last)
        } else {
            (principal_per_month, interest_per_month)
        };
        let total = match rounding {
            ScheduleRounding::Independent => installment_amount,
            ScheduleRounding::BalanceFinalInstallment => principal_due + interest_due,
        };

        rows.push(Installment {
            installment_number: number,
            due_date,
            principal_due,
            interest_due,
            total_due: total,
            principal_paid: Decimal::ZERO,
            interest_paid: Decimal::ZERO,
            paid: false,
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn twelve_percent_example() {
        let rows = generate_schedule(
            dec!(1200),
            dec!(12),
            12,
            date(2025, 1, 15),
            ScheduleRounding::Independent,
        )
        .unwrap();

        assert_eq!(monthly_rate(dec!(12)), dec!(0.01));
        assert_eq!(rows.len(), 12);
        for (idx, row) in rows.iter().enumerate() {
            assert_eq!(row.installment_number, idx as u32 + 1);
            assert_eq!(row.principal_due, dec!(100.00));
            assert_eq!(row.interest_due, dec!(12.00));
            assert_eq!(row.total_due, dec!(112.00));
            assert!(!row.paid);
        }
        assert_eq!(rows[0].due_date, date(2025, 2, 15));
        assert_eq!(rows[11].due_date, date(2026, 1, 15));
    }

    #[test]
    fn due_dates_clamp_to_month_end() {
        let rows = generate_schedule(
            dec!(300),
            dec!(10),
            3,
            date(2025, 1, 31),
            ScheduleRounding::Independent,
        )
        .unwrap();
        assert_eq!(rows[0].due_date, date(2025, 2, 28));
        assert_eq!(rows[1].due_date, date(2025, 3, 31));
        assert_eq!(rows[2].due_date, date(2025, 4, 30));
    }

    #[test]
    fn independent_rounding_keeps_drift() {
        let rows = generate_schedule(
            dec!(1000),
            dec!(0),
            3,
            date(2025, 1, 1),
            ScheduleRounding::Independent,
        )
        .unwrap();
        let principal: Decimal = rows.iter().map(|r| r.principal_due).sum();
        assert_eq!(principal, dec!(999.99));
    }

    #[test]
    fn final_installment_absorbs_residue() {
        let rows = generate_schedule(
            dec!(1000),
            dec!(10),
            3,
            date(2025, 1, 1),
            ScheduleRounding::BalanceFinalInstallment,
        )
        .unwrap();
        let principal: Decimal = rows.iter().map(|r| r.principal_due).sum();
        let interest: Decimal = rows.iter().map(|r| r.interest_due).sum();
        assert_eq!(principal, dec!(1000.00));
        assert_eq!(rows[2].principal_due, dec!(333.34));
        assert_eq!(interest, round_money(total_interest(dec!(1000), dec!(10), 3).unwrap()));
        assert_eq!(rows[2].total_due, rows[2].principal_due + rows[2].interest_due);
    }

    #[test]
    fn tiny_interest_never_leaves_a_negative_final_row() {
        // 0.30 of interest over 60 rows: half-up rows would overshoot.
        let rows = generate_schedule(
            dec!(625),
            dec!(0.01),
            60,
            date(2025, 1, 1),
            ScheduleRounding::BalanceFinalInstallment,
        )
        .unwrap();
        let interest: Decimal = rows.iter().map(|r| r.interest_due).sum();
        assert_eq!(interest, dec!(0.30));
        assert_eq!(rows[59].interest_due, dec!(0.30));
        assert!(rows.iter().all(|r| r.interest_due >= Decimal::ZERO));
    }

    #[test]
    fn zero_term_is_rejected() {
        let err = generate_schedule(
            dec!(100),
            dec!(12),
            0,
            date(2025, 1, 1),
            ScheduleRounding::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }

    #[test]
    fn oversized_loan_is_rejected_not_overflowed() {
        let err = generate_schedule(
            dec!(5_000_000_000_000_000_000_000_000_000),
            dec!(100),
            240,
            date(2025, 1, 1),
            ScheduleRounding::default(),
        )
        .unwrap_err();
        assert_eq!(err, DomainError::invalid_argument("total interest out of range"));

        let err = generate_schedule(Decimal::MAX, dec!(0), 12, date(2025, 1, 1), ScheduleRounding::default());
        assert!(err.is_ok());
        let err = generate_schedule(Decimal::MAX, dec!(1), 12, date(2025, 1, 1), ScheduleRounding::default())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: T rows; balanced rounding hits the totals exactly,
        /// independent rounding stays within half a cent per row.
        #[test]
        fn schedule_sums_track_totals(
            principal_cents in 10_000i64..100_000_000i64,
            rate_bp in 0i64..5_000i64,
            term in 1u32..=60u32,
        ) {
            let principal = Decimal::new(principal_cents, 2);
            let rate = Decimal::new(rate_bp, 2);
            let interest = total_interest(principal, rate, term).unwrap();
            let tolerance = Decimal::new(5, 3) * Decimal::from(term);

            let balanced = generate_schedule(
                principal, rate, term, date(2025, 6, 30), ScheduleRounding::BalanceFinalInstallment,
            ).unwrap();
            prop_assert_eq!(balanced.len(), term as usize);
            let p: Decimal = balanced.iter().map(|r| r.principal_due).sum();
            let i: Decimal = balanced.iter().map(|r| r.interest_due).sum();
            prop_assert_eq!(p, principal);
            prop_assert_eq!(i, round_money(interest));

            let independent = generate_schedule(
                principal, rate, term, date(2025, 6, 30), ScheduleRounding::Independent,
            ).unwrap();
            let p: Decimal = independent.iter().map(|r| r.principal_due).sum();
            let i: Decimal = independent.iter().map(|r| r.interest_due).sum();
            prop_assert!((p - principal).abs() <= tolerance);
            prop_assert!((i - interest).abs() <= tolerance);
        }
    }
}
