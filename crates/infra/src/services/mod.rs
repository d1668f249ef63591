//! Application services: the engine's public operations.
//!
//! Every operation takes an explicit [`CallerContext`], checks the institution
//! scope through the configured [`AccessPolicy`], runs one read-decide-commit
//! cycle against the event store and refreshes the snapshot projections that
//! back all reads.

pub mod ledger;
pub mod loans;
pub mod reporting;
pub mod savings;

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use coop_accounting::{LEDGER_AGGREGATE_TYPE, Ledger, LedgerId};
use coop_auth::{AccessError, AccessPolicy, CallerContext, InstitutionScopePolicy, ensure_institution_access};
use coop_core::{Aggregate, AggregateId, DomainError, ErrorKind, InstitutionId};
use coop_loans::{LOAN_AGGREGATE_TYPE, Loan, LoanId};
use coop_savings::{
    REGISTRY_AGGREGATE_TYPE, RegistryId, SAVINGS_ACCOUNT_AGGREGATE_TYPE, SavingsAccount, SavingsAccountId,
    SavingsRegistry,
};

use crate::clock::{Clock, SystemClock};
use crate::command_dispatcher::{CommandDispatcher, DispatchError, Staged};
use crate::config::EngineConfig;
use crate::directory::{InstitutionDirectory, MemberDirectory};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{ProjectionError, SnapshotProjection};

pub use ledger::{LedgerService, NewAccount, NewJournalEntry};
pub use loans::{LoanApplication, LoanService, RepaymentRequest};
pub use reporting::ReportingService;
pub use savings::{NewSavingsProduct, RecordedTransaction, SavingsService, TransactionRequest};

/// Error returned by every application service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Deterministic rejection, surfaced verbatim.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Storage or projection failure; nothing about the request itself.
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Domain(e) => e.kind(),
            ServiceError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            ServiceError::Infrastructure(_) => None,
        }
    }
}

impl From<DispatchError> for ServiceError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Domain(e) => ServiceError::Domain(e),
            DispatchError::Concurrency(msg) => ServiceError::Domain(DomainError::conflict(msg)),
            other => ServiceError::Infrastructure(other.to_string()),
        }
    }
}

impl From<ProjectionError> for ServiceError {
    fn from(value: ProjectionError) -> Self {
        ServiceError::Infrastructure(value.to_string())
    }
}

impl From<AccessError> for ServiceError {
    fn from(value: AccessError) -> Self {
        ServiceError::Domain(value.into())
    }
}

/// Everything the services share: the store, read models, collaborators
/// and settings.
pub struct EngineContext<S> {
    dispatcher: CommandDispatcher<S>,
    ledgers: SnapshotProjection<Ledger>,
    registries: SnapshotProjection<SavingsRegistry>,
    savings_accounts: SnapshotProjection<SavingsAccount>,
    loans: SnapshotProjection<Loan>,
    /// Number of commit-log events already folded into the projections.
    position: Mutex<u64>,
    institutions: Arc<dyn InstitutionDirectory>,
    members: Arc<dyn MemberDirectory>,
    policy: Arc<dyn AccessPolicy>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<S> EngineContext<S>
where
    S: EventStore,
{
    pub fn new<D>(store: S, directory: Arc<D>) -> Self
    where
        D: InstitutionDirectory + MemberDirectory + 'static,
    {
        Self {
            dispatcher: CommandDispatcher::new(store),
            ledgers: SnapshotProjection::new("ledgers", LEDGER_AGGREGATE_TYPE, |id| {
                Ledger::empty(LedgerId(id))
            }),
            registries: SnapshotProjection::new("savings_registries", REGISTRY_AGGREGATE_TYPE, |id| {
                SavingsRegistry::empty(RegistryId(id))
            }),
            savings_accounts: SnapshotProjection::new(
                "savings_accounts",
                SAVINGS_ACCOUNT_AGGREGATE_TYPE,
                |id| SavingsAccount::empty(SavingsAccountId(id)),
            ),
            loans: SnapshotProjection::new("loans", LOAN_AGGREGATE_TYPE, |id| Loan::empty(LoanId(id))),
            position: Mutex::new(0),
            institutions: directory.clone(),
            members: directory,
            policy: Arc::new(InstitutionScopePolicy),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.dispatcher.store()
    }

    fn authorize(&self, caller: &CallerContext, institution_id: InstitutionId) -> ServiceResult<()> {
        ensure_institution_access(self.policy.as_ref(), caller, institution_id)?;
        Ok(())
    }

    /// Run a read-decide-commit cycle, re-running it on optimistic
    /// concurrency failures up to `max_conflict_retries` times.
    fn with_retries<T>(
        &self,
        operation: &'static str,
        mut attempt: impl FnMut() -> Result<T, DispatchError>,
    ) -> ServiceResult<T> {
        let mut retries = 0u32;
        loop {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(DispatchError::Concurrency(msg)) if retries < self.config.max_conflict_retries => {
                    retries += 1;
                    warn!(operation, retry = retries, reason = %msg, "concurrency conflict, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Catch every projection up with a commit.
    fn refresh(&self, committed: &[StoredEvent]) -> ServiceResult<()> {
        debug!(events = committed.len(), "commit landed");
        self.sync()
    }

    /// Fold every event committed since the last sync into the projections,
    /// whoever wrote it. Reads call this first, so an engine over a store
    /// that already holds events sees them.
    fn sync(&self) -> ServiceResult<()> {
        let mut position = self
            .position
            .lock()
            .map_err(|_| ServiceError::Infrastructure("projection cursor poisoned".to_string()))?;
        let store = self.dispatcher.store();
        let pending = store.load_since(*position).map_err(ProjectionError::from)?;
        if pending.is_empty() {
            return Ok(());
        }

        for stored in &pending {
            let envelope = stored.to_envelope();
            self.ledgers.project(store, &envelope)?;
            self.registries.project(store, &envelope)?;
            self.savings_accounts.project(store, &envelope)?;
            self.loans.project(store, &envelope)?;
            *position += 1;
        }
        debug!(events = pending.len(), position = *position, "projections synced");
        Ok(())
    }

    fn load<A>(
        &self,
        institution_id: InstitutionId,
        aggregate_id: AggregateId,
        aggregate_type: &'static str,
        make: fn(AggregateId) -> A,
    ) -> Result<Staged<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: coop_events::Event + Serialize + DeserializeOwned,
    {
        self.dispatcher
            .load(institution_id, aggregate_id, aggregate_type, |_, id| make(id))
    }

    fn load_ledger(&self, institution_id: InstitutionId) -> Result<Staged<Ledger>, DispatchError> {
        self.load(
            institution_id,
            LedgerId::for_institution(institution_id).0,
            LEDGER_AGGREGATE_TYPE,
            |id| Ledger::empty(LedgerId(id)),
        )
    }

    fn load_registry(&self, institution_id: InstitutionId) -> Result<Staged<SavingsRegistry>, DispatchError> {
        self.load(
            institution_id,
            RegistryId::for_institution(institution_id).0,
            REGISTRY_AGGREGATE_TYPE,
            |id| SavingsRegistry::empty(RegistryId(id)),
        )
    }

    fn load_savings_account(
        &self,
        institution_id: InstitutionId,
        account_id: SavingsAccountId,
    ) -> Result<Staged<SavingsAccount>, DispatchError> {
        self.load(
            institution_id,
            account_id.0,
            SAVINGS_ACCOUNT_AGGREGATE_TYPE,
            |id| SavingsAccount::empty(SavingsAccountId(id)),
        )
    }

    fn load_loan(&self, institution_id: InstitutionId, loan_id: LoanId) -> Result<Staged<Loan>, DispatchError> {
        self.load(institution_id, loan_id.0, LOAN_AGGREGATE_TYPE, |id| Loan::empty(LoanId(id)))
    }

    /// Current ledger of an institution (empty when nothing was posted yet).
    fn ledger_snapshot(&self, institution_id: InstitutionId) -> ServiceResult<Ledger> {
        self.sync()?;
        Ok(self
            .ledgers
            .get(institution_id, LedgerId::for_institution(institution_id).0)
            .unwrap_or_else(|| Ledger::for_institution(institution_id)))
    }

    fn registry_snapshot(&self, institution_id: InstitutionId) -> ServiceResult<SavingsRegistry> {
        self.sync()?;
        Ok(self
            .registries
            .get(institution_id, RegistryId::for_institution(institution_id).0)
            .unwrap_or_else(|| SavingsRegistry::for_institution(institution_id)))
    }

    fn locate_savings_account(&self, account_id: SavingsAccountId) -> ServiceResult<(InstitutionId, SavingsAccount)> {
        self.sync()?;
        self.savings_accounts
            .find(account_id.0)
            .ok_or_else(|| DomainError::not_found(format!("savings account {account_id}")).into())
    }

    fn savings_accounts_of(&self, institution_id: InstitutionId) -> ServiceResult<Vec<SavingsAccount>> {
        self.sync()?;
        Ok(self.savings_accounts.list(institution_id))
    }

    fn locate_loan(&self, loan_id: LoanId) -> ServiceResult<(InstitutionId, Loan)> {
        self.sync()?;
        self.loans
            .find(loan_id.0)
            .ok_or_else(|| DomainError::not_found(format!("loan {loan_id}")).into())
    }

    fn loans_of(&self, institution_id: InstitutionId) -> ServiceResult<Vec<Loan>> {
        self.sync()?;
        Ok(self.loans.list(institution_id))
    }
}

/// The engine's four services over one shared context.
pub struct Engine<S> {
    context: Arc<EngineContext<S>>,
    ledger: LedgerService<S>,
    loans: LoanService<S>,
    savings: SavingsService<S>,
    reporting: ReportingService<S>,
}

impl<S> Engine<S>
where
    S: EventStore,
{
    pub fn new(context: EngineContext<S>) -> Self {
        let context = Arc::new(context);
        Self {
            ledger: LedgerService::new(context.clone()),
            loans: LoanService::new(context.clone()),
            savings: SavingsService::new(context.clone()),
            reporting: ReportingService::new(context.clone()),
            context,
        }
    }

    pub fn context(&self) -> &EngineContext<S> {
        &self.context
    }

    pub fn ledger(&self) -> &LedgerService<S> {
        &self.ledger
    }

    pub fn loans(&self) -> &LoanService<S> {
        &self.loans
    }

    pub fn savings(&self) -> &SavingsService<S> {
        &self.savings
    }

    pub fn reporting(&self) -> &ReportingService<S> {
        &self.reporting
    }
}
