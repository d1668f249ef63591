use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use coop_loans::{Loan, LoanStatus};
use coop_savings::{SavingsAccount, TransactionType};

use crate::period::{as_of_label, range_label};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanPortfolioSummary {
    pub institution_name: String,
    pub period_label: String,
    pub as_of_date: NaiveDate,
    pub total_loans: u64,
    /// Principal of every loan that has been disbursed.
    pub total_disbursed: Decimal,
    /// Sum of derived balances of DISBURSED/REPAYING loans.
    pub total_outstanding: Decimal,
    pub total_repaid: Decimal,
    /// Disbursed in the 12 months ending at `as_of_date`.
    pub loans_disbursed_in_period: u64,
    pub loans_closed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavingsSummary {
    pub institution_name: String,
    pub period_label: String,
    pub as_of_date: NaiveDate,
    pub total_accounts: u64,
    pub total_balance: Decimal,
    pub deposit_count_in_period: u64,
    pub total_deposits_in_period: Decimal,
    pub withdrawal_count_in_period: u64,
    pub total_withdrawals_in_period: Decimal,
}

pub fn loan_portfolio_summary(
    institution_name: &str,
    loans: &[Loan],
    as_of: NaiveDate,
    label: Option<&str>,
) -> LoanPortfolioSummary {
    let window_start = as_of
        .checked_sub_months(Months::new(12))
        .unwrap_or(NaiveDate::MIN);

    let total_disbursed: Decimal = loans
        .iter()
        .filter(|l| l.disbursement_date().is_some())
        .map(|l| l.principal())
        .sum();
    let total_outstanding: Decimal = loans.iter().filter_map(|l| l.outstanding_balance()).sum();
    let loans_disbursed_in_period = loans
        .iter()
        .filter_map(|l| l.disbursement_date())
        .filter(|d| *d <= as_of && *d > window_start)
        .count() as u64;
    let loans_closed = loans
        .iter()
        .filter(|l| l.status() == LoanStatus::Closed)
        .count() as u64;

    LoanPortfolioSummary {
        institution_name: institution_name.to_string(),
        period_label: as_of_label(label, as_of),
        as_of_date: as_of,
        total_loans: loans.len() as u64,
        total_disbursed,
        total_outstanding,
        total_repaid: total_disbursed - total_outstanding,
        loans_disbursed_in_period,
        loans_closed,
    }
}

/// Account totals at the current balance, transaction activity restricted to
/// `[start, end]`.
pub fn savings_summary(
    institution_name: &str,
    accounts: &[SavingsAccount],
    start: NaiveDate,
    end: NaiveDate,
    label: Option<&str>,
) -> SavingsSummary {
    let mut summary = SavingsSummary {
        institution_name: institution_name.to_string(),
        period_label: range_label(label, start, end),
        as_of_date: end,
        total_accounts: accounts.len() as u64,
        total_balance: accounts.iter().map(|a| a.balance()).sum(),
        deposit_count_in_period: 0,
        total_deposits_in_period: Decimal::ZERO,
        withdrawal_count_in_period: 0,
        total_withdrawals_in_period: Decimal::ZERO,
    };

    let in_period = accounts
        .iter()
        .flat_map(|a| a.transactions())
        .filter(|t| t.transaction_date >= start && t.transaction_date <= end);
    for tx in in_period {
        match tx.transaction_type {
            TransactionType::Deposit => {
                summary.deposit_count_in_period += 1;
                summary.total_deposits_in_period += tx.amount;
            }
            TransactionType::Withdrawal => {
                summary.withdrawal_count_in_period += 1;
                summary.total_withdrawals_in_period += tx.amount;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coop_core::{Aggregate, AggregateId, InstitutionId, MemberId};
    use coop_loans::{
        AllocationPolicy, ApplyForLoan, DecideLoan, DisburseLoan, LoanCommand, LoanId,
        RecordRepayment, RepaymentId, ScheduleRounding,
    };
    use coop_savings::{
        OpenAccount, RecordTransaction, SavingsAccountCommand, SavingsAccountId, SavingsProductId,
        SavingsTransactionId,
    };
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn loan(inst: InstitutionId, principal: Decimal, approve: bool, disbursed: Option<NaiveDate>) -> Loan {
        let id = LoanId::new(AggregateId::new());
        let mut loan = Loan::empty(id);
        loan.execute(&LoanCommand::Apply(ApplyForLoan {
            institution_id: inst,
            loan_id: id,
            member_id: MemberId::new(),
            principal,
            interest_rate: dec!(12),
            term_months: 12,
            collateral_account_id: None,
            reason: None,
            schedule_rounding: ScheduleRounding::BalanceFinalInstallment,
            applied_by: None,
            occurred_at: Utc::now(),
        }))
        .unwrap();
        if approve {
            loan.execute(&LoanCommand::Decide(DecideLoan {
                institution_id: inst,
                loan_id: id,
                approved: true,
                decided_by: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        }
        if let Some(disbursement_date) = disbursed {
            loan.execute(&LoanCommand::Disburse(DisburseLoan {
                institution_id: inst,
                loan_id: id,
                disbursement_date,
                disbursed_by: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        }
        loan
    }

    fn repay(loan: &mut Loan, inst: InstitutionId, amount: Decimal) {
        let loan_id = loan.id_typed();
        loan.execute(&LoanCommand::RecordRepayment(RecordRepayment {
            institution_id: inst,
            loan_id,
            repayment_id: RepaymentId::new(),
            amount,
            payment_date: date(2025, 6, 1),
            target_installment: None,
            policy: AllocationPolicy::InterestFirst,
            recorded_by: None,
            occurred_at: Utc::now(),
        }))
        .unwrap();
    }

    #[test]
    fn portfolio_summary_counts_and_sums() {
        let inst = InstitutionId::new();
        let as_of = date(2025, 6, 30);

        let pending = loan(inst, dec!(300), false, None);
        let mut active = loan(inst, dec!(1200), true, Some(date(2025, 1, 15)));
        repay(&mut active, inst, dec!(112));
        let mut closed = loan(inst, dec!(600), true, Some(date(2024, 6, 30)));
        repay(&mut closed, inst, dec!(1000));
        let old = loan(inst, dec!(100), true, Some(date(2023, 1, 1)));

        let summary = loan_portfolio_summary("Umoja", &[pending, active, closed, old], as_of, None);
        assert_eq!(summary.total_loans, 4);
        assert_eq!(summary.total_disbursed, dec!(1900.00));
        assert_eq!(summary.total_outstanding, dec!(1200.00));
        assert_eq!(summary.total_repaid, dec!(700.00));
        // 2024-06-30 sits exactly 12 months back and falls outside the window.
        assert_eq!(summary.loans_disbursed_in_period, 1);
        assert_eq!(summary.loans_closed, 1);
        assert_eq!(summary.period_label, "As of 2025-06-30");
    }

    #[test]
    fn savings_summary_restricts_activity_to_window() {
        let inst = InstitutionId::new();
        let member = MemberId::new();
        let product = SavingsProductId::new();
        let id = SavingsAccountId::for_member_product(member, product);
        let mut account = SavingsAccount::empty(id);
        account
            .execute(&SavingsAccountCommand::Open(OpenAccount {
                institution_id: inst,
                account_id: id,
                member_id: member,
                product_id: product,
                account_number: "SAV-000001".to_string(),
                opened_date: date(2025, 1, 1),
                liability_account_id: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for (kind, amount, day) in [
            (TransactionType::Deposit, dec!(500), date(2025, 1, 10)),
            (TransactionType::Deposit, dec!(200), date(2025, 2, 10)),
            (TransactionType::Withdrawal, dec!(50), date(2025, 2, 20)),
        ] {
            account
                .execute(&SavingsAccountCommand::RecordTransaction(RecordTransaction {
                    institution_id: inst,
                    account_id: id,
                    transaction_id: SavingsTransactionId::new(),
                    transaction_type: kind,
                    amount,
                    transaction_date: day,
                    created_by: None,
                    occurred_at: Utc::now(),
                }))
                .unwrap();
        }

        let summary = savings_summary("Umoja", &[account], date(2025, 2, 1), date(2025, 2, 28), None);
        assert_eq!(summary.total_accounts, 1);
        assert_eq!(summary.total_balance, dec!(650.00));
        assert_eq!(summary.deposit_count_in_period, 1);
        assert_eq!(summary.total_deposits_in_period, dec!(200.00));
        assert_eq!(summary.withdrawal_count_in_period, 1);
        assert_eq!(summary.total_withdrawals_in_period, dec!(50.00));
        assert_eq!(summary.as_of_date, date(2025, 2, 28));
    }
}
