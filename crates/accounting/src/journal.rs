use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coop_core::{InstitutionId, UserId, impl_uuid_newtype};

use crate::AccountId;

/// Identifier of a posted journal entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JournalEntryId(Uuid);

impl_uuid_newtype!(JournalEntryId, "JournalEntryId");

/// What business event a journal entry records.
///
/// Closed set of reference kinds; the id points into the owning module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "reference_type", content = "reference_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryReference {
    /// Manual chart-of-accounts posting with no originating record.
    Manual,
    SavingsTransaction(Uuid),
    LoanDisbursement(Uuid),
    LoanRepayment(Uuid),
}

impl EntryReference {
    pub fn reference_type(&self) -> Option<&'static str> {
        match self {
            EntryReference::Manual => None,
            EntryReference::SavingsTransaction(_) => Some("SAVINGS_TRANSACTION"),
            EntryReference::LoanDisbursement(_) => Some("LOAN_DISBURSEMENT"),
            EntryReference::LoanRepayment(_) => Some("LOAN_REPAYMENT"),
        }
    }

    pub fn reference_id(&self) -> Option<Uuid> {
        match self {
            EntryReference::Manual => None,
            EntryReference::SavingsTransaction(id)
            | EntryReference::LoanDisbursement(id)
            | EntryReference::LoanRepayment(id) => Some(*id),
        }
    }
}

/// Requested posting line: one account, a debit and a credit amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub account_id: AccountId,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl LineInput {
    pub fn debit(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: amount,
            credit: Decimal::ZERO,
        }
    }

    pub fn credit(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: Decimal::ZERO,
            credit: amount,
        }
    }
}

/// Posted line, exclusively owned by its entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub line_no: u32,
    pub account_id: AccountId,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl JournalLine {
    /// Debit minus credit.
    pub fn net_debit(&self) -> Decimal {
        self.debit - self.credit
    }
}

/// Immutable, balanced journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: JournalEntryId,
    pub institution_id: InstitutionId,
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference: EntryReference,
    pub created_by: Option<UserId>,
    pub lines: Vec<JournalLine>,
}

impl JournalEntry {
    pub fn total_debit(&self) -> Decimal {
        self.lines.iter().map(|l| l.debit).sum()
    }

    pub fn total_credit(&self) -> Decimal {
        self.lines.iter().map(|l| l.credit).sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debit() == self.total_credit()
    }
}
