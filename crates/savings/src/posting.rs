//! Savings posting adapter: a deposit or withdrawal becomes two balanced
//! ledger lines between the cash account and the member liability account.

use chrono::NaiveDate;

use coop_accounting::{AccountId, EntryReference, LineInput};
use coop_core::MemberId;

use crate::{SavingsProductId, SavingsTransaction, TransactionType};

/// Ledger code of the liability account holding one member's savings in one
/// product. Deterministic so repeated provisioning finds the same account.
pub fn liability_account_code(member_id: MemberId, product_id: SavingsProductId) -> String {
    format!("SL-{member_id}-{product_id}")
}

pub fn liability_account_name(member_number: &str, product_name: &str) -> String {
    format!("Member Savings - {member_number} - {product_name}")
}

/// Journal entry request for one savings transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavingsPosting {
    pub entry_date: NaiveDate,
    pub description: &'static str,
    pub reference: EntryReference,
    pub lines: Vec<LineInput>,
}

pub fn entry_description(transaction_type: TransactionType) -> &'static str {
    match transaction_type {
        TransactionType::Deposit => "Savings deposit",
        TransactionType::Withdrawal => "Savings withdrawal",
    }
}

/// Deposit: debit cash, credit liability. Withdrawal: the mirror image.
pub fn posting_for(
    transaction: &SavingsTransaction,
    cash_account: AccountId,
    liability_account: AccountId,
) -> SavingsPosting {
    let amount = transaction.amount;
    let lines = match transaction.transaction_type {
        TransactionType::Deposit => vec![
            LineInput::debit(cash_account, amount),
            LineInput::credit(liability_account, amount),
        ],
        TransactionType::Withdrawal => vec![
            LineInput::debit(liability_account, amount),
            LineInput::credit(cash_account, amount),
        ],
    };

    SavingsPosting {
        entry_date: transaction.transaction_date,
        description: entry_description(transaction.transaction_type),
        reference: EntryReference::SavingsTransaction(*transaction.id.as_uuid()),
        lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SavingsAccountId, SavingsTransactionId};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn tx(transaction_type: TransactionType, amount: Decimal) -> SavingsTransaction {
        SavingsTransaction {
            id: SavingsTransactionId::new(),
            account_id: SavingsAccountId::for_member_product(MemberId::new(), SavingsProductId::new()),
            transaction_type,
            amount,
            transaction_date: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            created_by: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn deposit_debits_cash_and_credits_liability() {
        let cash = AccountId::new();
        let liability = AccountId::new();
        let deposit = tx(TransactionType::Deposit, dec!(500.00));
        let posting = posting_for(&deposit, cash, liability);

        assert_eq!(posting.description, "Savings deposit");
        assert_eq!(posting.lines, vec![
            LineInput::debit(cash, dec!(500.00)),
            LineInput::credit(liability, dec!(500.00)),
        ]);
        assert_eq!(posting.reference.reference_id(), Some(*deposit.id.as_uuid()));
        assert_eq!(posting.reference.reference_type(), Some("SAVINGS_TRANSACTION"));
    }

    #[test]
    fn withdrawal_is_the_mirror_image() {
        let cash = AccountId::new();
        let liability = AccountId::new();
        let posting = posting_for(&tx(TransactionType::Withdrawal, dec!(20.00)), cash, liability);

        assert_eq!(posting.description, "Savings withdrawal");
        assert_eq!(posting.lines[0], LineInput::debit(liability, dec!(20.00)));
        assert_eq!(posting.lines[1], LineInput::credit(cash, dec!(20.00)));
    }

    #[test]
    fn liability_naming_is_deterministic() {
        let member = MemberId::new();
        let product = SavingsProductId::new();
        assert_eq!(
            liability_account_code(member, product),
            format!("SL-{member}-{product}")
        );
        assert_eq!(
            liability_account_name("M-0042", "Holiday savings"),
            "Member Savings - M-0042 - Holiday savings"
        );
    }
}
