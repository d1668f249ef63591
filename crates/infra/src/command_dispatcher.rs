//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (institution-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//! ```
//!
//! Steps 1-3 produce a [`Staged`] aggregate. Several staged aggregates can be
//! committed together through [`CommandDispatcher::commit`], which is how one
//! operation updates a savings account and the institution ledger in a single
//! all-or-nothing append.
//!
//! This module contains no IO itself; it composes the `EventStore` trait.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use coop_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, InstitutionId};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    /// Institution isolation violation (cross-institution or cross-aggregate stream mixing).
    #[error("institution isolation violation: {0}")]
    IsolationViolation(String),
    /// Deterministic rejection by the aggregate.
    #[error(transparent)]
    Domain(DomainError),
    /// Failed to deserialize historical event payloads into the aggregate event type.
    #[error("failed to decode stored event: {0}")]
    Deserialize(String),
    /// Persisting to the event store failed.
    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::IsolationViolation(msg) => DispatchError::IsolationViolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        DispatchError::Domain(value)
    }
}

/// A rehydrated aggregate plus the events decided against it but not yet
/// committed.
///
/// Commands executed on a `Staged` aggregate are applied immediately, so a
/// later command sees the effect of an earlier one (e.g. an account created
/// and then posted to within the same operation).
#[derive(Debug)]
pub struct Staged<A: Aggregate> {
    institution_id: InstitutionId,
    aggregate_id: AggregateId,
    aggregate_type: &'static str,
    base_version: u64,
    aggregate: A,
    pending: Vec<A::Event>,
}

impl<A> Staged<A>
where
    A: Aggregate<Error = DomainError>,
    A::Event: coop_events::Event + Serialize,
{
    pub fn state(&self) -> &A {
        &self.aggregate
    }

    pub fn institution_id(&self) -> InstitutionId {
        self.institution_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    /// Stream version the aggregate was loaded at.
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    pub fn pending(&self) -> &[A::Event] {
        &self.pending
    }

    /// Decide and apply a command; the events stay pending until commit.
    pub fn execute(&mut self, command: &A::Command) -> Result<Vec<A::Event>, DispatchError> {
        let events = self.aggregate.execute(command)?;
        self.pending.extend(events.iter().cloned());
        Ok(events)
    }

    fn expected_version(&self) -> ExpectedVersion {
        if self.base_version == 0 {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(self.base_version)
        }
    }

    /// Serialize pending events into an append guarded by the loaded version.
    pub fn into_append(self) -> Result<StreamAppend, DispatchError> {
        let expected = self.expected_version();
        let events = self
            .pending
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    self.institution_id,
                    self.aggregate_id,
                    self.aggregate_type,
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StreamAppend::new(events, expected))
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// ## Execution Guarantees
///
/// - **Atomicity**: a commit persists every staged stream or none
/// - **Consistency**: institution isolation and optimistic concurrency are enforced
/// - **Determinism**: aggregates are pure; all IO goes through the store
///
/// A concurrency error means another writer got there first; callers reload
/// and re-run the whole operation.
#[derive(Debug)]
pub struct CommandDispatcher<S> {
    store: S,
}

impl<S> CommandDispatcher<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> CommandDispatcher<S>
where
    S: EventStore,
{
    /// Load and rehydrate an aggregate, ready to take commands.
    pub fn load<A>(
        &self,
        institution_id: InstitutionId,
        aggregate_id: AggregateId,
        aggregate_type: &'static str,
        make_aggregate: impl FnOnce(InstitutionId, AggregateId) -> A,
    ) -> Result<Staged<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: coop_events::Event + Serialize + DeserializeOwned,
    {
        let history = self.store.load_stream(institution_id, aggregate_id)?;
        validate_loaded_stream(institution_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(institution_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        Ok(Staged {
            institution_id,
            aggregate_id,
            aggregate_type,
            base_version: stream_version(&history),
            aggregate,
            pending: Vec::new(),
        })
    }

    /// Commit the pending events of several staged aggregates atomically.
    pub fn commit(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, DispatchError> {
        let appends: Vec<StreamAppend> = appends.into_iter().filter(|a| !a.is_empty()).collect();
        if appends.is_empty() {
            return Ok(vec![]);
        }
        Ok(self.store.append_atomic(appends)?)
    }

    /// Load, decide and persist a single command against one aggregate.
    pub fn dispatch<A>(
        &self,
        institution_id: InstitutionId,
        aggregate_id: AggregateId,
        aggregate_type: &'static str,
        command: A::Command,
        make_aggregate: impl FnOnce(InstitutionId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: coop_events::Event + Serialize + DeserializeOwned,
    {
        let mut staged = self.load(institution_id, aggregate_id, aggregate_type, make_aggregate)?;
        staged.execute(&command)?;
        self.commit(vec![staged.into_append()?])
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

/// Rejects streams that mix institutions or aggregates, or whose sequence
/// numbers are not strictly increasing from 1.
pub(crate) fn validate_loaded_stream(
    institution_id: InstitutionId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.institution_id != institution_id {
            return Err(DispatchError::IsolationViolation(format!(
                "loaded stream contains wrong institution_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::IsolationViolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

pub(crate) fn decode_event<A>(stored: &StoredEvent) -> Result<A::Event, DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    serde_json::from_value(stored.payload.clone()).map_err(|e| {
        DispatchError::Deserialize(format!(
            "{} #{}: {e}",
            stored.event_type, stored.sequence_number
        ))
    })
}

pub(crate) fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev = decode_event::<A>(stored)?;
        aggregate.apply(&ev);
    }
    Ok(())
}
