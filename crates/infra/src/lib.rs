//! Infrastructure layer: event store, command dispatch, projections and the
//! application services that make up the engine's public surface.

pub mod clock;
pub mod command_dispatcher;
pub mod config;
pub mod directory;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod services;


pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use directory::{
    InMemoryDirectory, Institution, InstitutionDirectory, InstitutionKind, InstitutionStatus, Member,
    MemberDirectory,
};
pub use event_store::InMemoryEventStore;
pub use services::{
    Engine, EngineContext, LedgerService, LoanApplication, LoanService, NewAccount, NewJournalEntry,
    NewSavingsProduct, RecordedTransaction, RepaymentRequest, ReportingService, SavingsService,
    ServiceError, ServiceResult, TransactionRequest,
};
