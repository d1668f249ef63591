//! Accounting module (double-entry general ledger, event-sourced).
//!
//! Pure domain logic only: no IO, no persistence concerns.

pub mod account;
pub mod journal;
pub mod ledger;

pub use account::{Account, AccountId, AccountType};
pub use journal::{EntryReference, JournalEntry, JournalEntryId, JournalLine, LineInput};
pub use ledger::{
    AccountCreated, CreateAccount, JournalEntryPosted, LEDGER_AGGREGATE_TYPE, Ledger,
    LedgerCommand, LedgerEvent, LedgerId, PostJournalEntry,
};
