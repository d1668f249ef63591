//! Savings module: products, member savings accounts, and the posting adapter
//! that turns deposits and withdrawals into ledger lines.
//!
//! Pure domain logic only: no IO, no persistence concerns.

pub mod account;
pub mod posting;
pub mod product;
pub mod registry;

pub use account::{
    AccountOpened, ChangeStatus, LinkLiabilityAccount, LiabilityAccountLinked, OpenAccount,
    RecordTransaction, SAVINGS_ACCOUNT_AGGREGATE_TYPE, SavingsAccount, SavingsAccountCommand,
    SavingsAccountEvent, SavingsAccountId, SavingsAccountStatus, SavingsTransaction,
    SavingsTransactionId, StatusChanged, TransactionRecorded, TransactionType,
};
pub use posting::{
    SavingsPosting, entry_description, liability_account_code, liability_account_name, posting_for,
};
pub use product::{SavingsCategory, SavingsProduct, SavingsProductId};
pub use registry::{
    AccountRegistered, CreateProduct, ProductCreated, REGISTRY_AGGREGATE_TYPE, RegisterAccount,
    RegistryCommand, RegistryEvent, RegistryId, SavingsRegistry, format_account_number,
};
