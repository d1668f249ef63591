//! Repayment allocation across unpaid installments.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use coop_core::{DomainError, DomainResult};

use crate::schedule::Installment;

/// Which component of an installment a payment satisfies first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    #[default]
    InterestFirst,
    PrincipalFirst,
}

impl core::str::FromStr for AllocationPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interest_first" => Ok(Self::InterestFirst),
            "principal_first" => Ok(Self::PrincipalFirst),
            other => Err(DomainError::invalid_argument(format!(
                "unknown allocation policy '{other}'"
            ))),
        }
    }
}

/// What one payment put towards one installment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentAllocation {
    pub installment_number: u32,
    pub interest: Decimal,
    pub principal: Decimal,
    /// The installment is fully covered after this payment.
    pub completes: bool,
}

/// Result of splitting one payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub principal_component: Decimal,
    pub interest_component: Decimal,
    /// Part of the payment left over once candidates ran out.
    pub unallocated: Decimal,
    pub installments: Vec<InstallmentAllocation>,
}

/// Split `amount` across the unpaid rows of `schedule`, oldest first.
///
/// With `target` set only that installment is considered; it must exist and
/// be unpaid. Coverage is cumulative: amounts already paid towards a row are
/// not charged again.
pub fn allocate(
    schedule: &[Installment],
    amount: Decimal,
    target: Option<u32>,
    policy: AllocationPolicy,
) -> DomainResult<Allocation> {
    let mut candidates: Vec<&Installment> = match target {
        Some(number) => {
            let row = schedule
                .iter()
                .find(|r| r.installment_number == number)
                .ok_or_else(|| {
                    DomainError::invalid_argument(format!("installment {number} does not exist"))
                })?;
            if row.paid {
                return Err(DomainError::invalid_argument(format!(
                    "installment {number} is already paid"
                )));
            }
            vec![row]
        }
        None => schedule.iter().filter(|r| !r.paid).collect(),
    };
    candidates.sort_by_key(|r| r.installment_number);

    let mut remaining = amount;
    let mut principal_component = Decimal::ZERO;
    let mut interest_component = Decimal::ZERO;
    let mut installments = Vec::new();

    for row in candidates {
        if remaining <= Decimal::ZERO {
            break;
        }

        let interest_open = row.interest_outstanding();
        let principal_open = row.principal_outstanding();

        let (interest, principal) = match policy {
            AllocationPolicy::InterestFirst => {
                let interest = remaining.min(interest_open);
                let principal = (remaining - interest).min(principal_open);
                (interest, principal)
            }
            AllocationPolicy::PrincipalFirst => {
                let principal = remaining.min(principal_open);
                let interest = (remaining - principal).min(interest_open);
                (interest, principal)
            }
        };

        remaining -= interest + principal;
        interest_component += interest;
        principal_component += principal;
        installments.push(InstallmentAllocation {
            installment_number: row.installment_number,
            interest,
            principal,
            completes: interest == interest_open && principal == principal_open,
        });
    }

    Ok(Allocation {
        principal_component,
        interest_component,
        unallocated: remaining.max(Decimal::ZERO),
        installments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ScheduleRounding, generate_schedule};
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn schedule_1200() -> Vec<Installment> {
        generate_schedule(
            dec!(1200),
            dec!(12),
            12,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            ScheduleRounding::BalanceFinalInstallment,
        )
        .unwrap()
    }

    fn apply(schedule: &mut [Installment], allocation: &Allocation) {
        for part in &allocation.installments {
            let row = schedule
                .iter_mut()
                .find(|r| r.installment_number == part.installment_number)
                .unwrap();
            row.interest_paid += part.interest;
            row.principal_paid += part.principal;
            row.paid = row.is_covered();
        }
    }

    #[test]
    fn full_installment_payment_splits_interest_then_principal() {
        let schedule = schedule_1200();
        let a = allocate(&schedule, dec!(112.00), None, AllocationPolicy::InterestFirst).unwrap();
        assert_eq!(a.interest_component, dec!(12.00));
        assert_eq!(a.principal_component, dec!(100.00));
        assert_eq!(a.unallocated, Decimal::ZERO);
        assert_eq!(a.installments.len(), 1);
        assert!(a.installments[0].completes);
    }

    #[test]
    fn partial_payment_covers_interest_first() {
        let schedule = schedule_1200();
        let a = allocate(&schedule, dec!(50), None, AllocationPolicy::InterestFirst).unwrap();
        assert_eq!(a.interest_component, dec!(12.00));
        assert_eq!(a.principal_component, dec!(38.00));
        assert!(!a.installments[0].completes);
    }

    #[test]
    fn principal_first_policy_reverses_the_order() {
        let schedule = schedule_1200();
        let a = allocate(&schedule, dec!(50), None, AllocationPolicy::PrincipalFirst).unwrap();
        assert_eq!(a.principal_component, dec!(50));
        assert_eq!(a.interest_component, Decimal::ZERO);
    }

    #[test]
    fn payment_spills_into_later_installments() {
        let schedule = schedule_1200();
        let a = allocate(&schedule, dec!(150), None, AllocationPolicy::InterestFirst).unwrap();
        assert_eq!(a.installments.len(), 2);
        assert!(a.installments[0].completes);
        assert_eq!(a.installments[1].interest, dec!(12.00));
        assert_eq!(a.installments[1].principal, dec!(26.00));
    }

    #[test]
    fn split_payments_complete_an_installment_cumulatively() {
        let mut schedule = schedule_1200();
        let first = allocate(&schedule, dec!(60), None, AllocationPolicy::InterestFirst).unwrap();
        apply(&mut schedule, &first);
        assert!(!schedule[0].paid);

        let second = allocate(&schedule, dec!(52), None, AllocationPolicy::InterestFirst).unwrap();
        assert_eq!(second.interest_component, Decimal::ZERO);
        assert_eq!(second.principal_component, dec!(52.00));
        assert!(second.installments[0].completes);
        apply(&mut schedule, &second);
        assert!(schedule[0].paid);
    }

    #[test]
    fn target_installment_must_exist_and_be_unpaid() {
        let mut schedule = schedule_1200();
        let missing = allocate(&schedule, dec!(10), Some(13), AllocationPolicy::InterestFirst);
        assert!(matches!(missing, Err(DomainError::InvalidArgument(_))));

        schedule[2].paid = true;
        let paid = allocate(&schedule, dec!(10), Some(3), AllocationPolicy::InterestFirst);
        assert!(matches!(paid, Err(DomainError::InvalidArgument(_))));

        let targeted = allocate(&schedule, dec!(500), Some(5), AllocationPolicy::InterestFirst).unwrap();
        assert_eq!(targeted.installments.len(), 1);
        assert_eq!(targeted.installments[0].installment_number, 5);
        assert_eq!(targeted.unallocated, dec!(388.00));
    }

    #[test]
    fn excess_over_everything_owed_is_left_unallocated() {
        let schedule = schedule_1200();
        let a = allocate(&schedule, dec!(2000), None, AllocationPolicy::InterestFirst).unwrap();
        assert_eq!(a.principal_component, dec!(1200.00));
        assert_eq!(a.interest_component, dec!(144.00));
        assert_eq!(a.unallocated, dec!(656.00));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: no installment ever receives more than it owes, components
        /// never exceed the payment, and `paid` tracks cumulative coverage.
        #[test]
        fn allocation_never_overpays_an_installment(
            payments in prop::collection::vec(1i64..60_000i64, 1..30),
            principal_first in any::<bool>(),
        ) {
            let policy = if principal_first {
                AllocationPolicy::PrincipalFirst
            } else {
                AllocationPolicy::InterestFirst
            };
            let mut schedule = schedule_1200();

            for cents in payments {
                let amount = Decimal::new(cents, 2);
                let a = allocate(&schedule, amount, None, policy).unwrap();
                prop_assert_eq!(a.principal_component + a.interest_component + a.unallocated, amount);
                apply(&mut schedule, &a);

                for row in &schedule {
                    prop_assert!(row.interest_paid <= row.interest_due);
                    prop_assert!(row.principal_paid <= row.principal_due);
                    prop_assert_eq!(row.paid, row.is_covered());
                }
            }
        }
    }
}
