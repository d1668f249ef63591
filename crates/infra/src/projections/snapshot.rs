use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use coop_core::{Aggregate, AggregateId, AggregateRoot, InstitutionId};
use coop_events::EventEnvelope;

use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::read_model::{InMemoryInstitutionStore, InstitutionStore};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("institution isolation violation: {0}")]
    IsolationViolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("projection lock poisoned")]
    Poisoned,
}

/// Projection: latest rehydrated state of every aggregate of one type.
///
/// The snapshot's own `version()` is the stream cursor: an event is applied
/// only when its sequence number is exactly `version + 1`, so replays are
/// harmless and gaps are detected.
pub struct SnapshotProjection<A, S = InMemoryInstitutionStore<AggregateId, A>>
where
    S: InstitutionStore<AggregateId, A>,
{
    name: &'static str,
    aggregate_type: &'static str,
    make: fn(AggregateId) -> A,
    store: S,
    locator: RwLock<HashMap<AggregateId, InstitutionId>>,
    catch_up: Mutex<()>,
}

impl<A> SnapshotProjection<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, aggregate_type: &'static str, make: fn(AggregateId) -> A) -> Self {
        Self::with_store(name, aggregate_type, make, InMemoryInstitutionStore::new())
    }
}

impl<A, S> SnapshotProjection<A, S>
where
    S: InstitutionStore<AggregateId, A>,
{
    pub fn with_store(
        name: &'static str,
        aggregate_type: &'static str,
        make: fn(AggregateId) -> A,
        store: S,
    ) -> Self {
        Self {
            name,
            aggregate_type,
            make,
            store,
            locator: RwLock::new(HashMap::new()),
            catch_up: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    pub fn get(&self, institution_id: InstitutionId, aggregate_id: AggregateId) -> Option<A> {
        self.store.get(institution_id, &aggregate_id)
    }

    /// Institution owning a known aggregate.
    pub fn institution_of(&self, aggregate_id: AggregateId) -> Option<InstitutionId> {
        self.locator.read().ok()?.get(&aggregate_id).copied()
    }

    /// Look an aggregate up by id alone.
    pub fn find(&self, aggregate_id: AggregateId) -> Option<(InstitutionId, A)> {
        let institution_id = self.institution_of(aggregate_id)?;
        self.get(institution_id, aggregate_id)
            .map(|snapshot| (institution_id, snapshot))
    }

    /// All snapshots of an institution, in order of first appearance.
    pub fn list(&self, institution_id: InstitutionId) -> Vec<A> {
        self.store.list(institution_id)
    }
}

impl<A, S> SnapshotProjection<A, S>
where
    A: Aggregate + Clone,
    A::Event: DeserializeOwned,
    S: InstitutionStore<AggregateId, A>,
{
    /// Apply one committed event if it is the next one for its stream.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != self.aggregate_type {
            return Ok(());
        }

        let institution_id = envelope.institution_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if let Some(owner) = self.institution_of(aggregate_id) {
            if owner != institution_id {
                return Err(ProjectionError::IsolationViolation(format!(
                    "aggregate {aggregate_id} already projected for another institution"
                )));
            }
        }

        let event: A::Event = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let make = self.make;
        let mut outcome: Result<(), ProjectionError> = Ok(());
        let applied = self.store.upsert_with(
            institution_id,
            aggregate_id,
            &|| make(aggregate_id),
            &mut |snapshot| {
                let last = snapshot.version();
                if seq <= last {
                    return false;
                }
                if seq != last + 1 {
                    outcome = Err(ProjectionError::NonMonotonicSequence { last, found: seq });
                    return false;
                }
                snapshot.apply(&event);
                true
            },
        );
        outcome?;

        if applied {
            self.locator
                .write()
                .map_err(|_| ProjectionError::Poisoned)?
                .insert(aggregate_id, institution_id);
        }
        Ok(())
    }

    /// Apply one committed event, repairing a gap in its stream from the
    /// store.
    pub fn project<E: EventStore + ?Sized>(
        &self,
        store: &E,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        match self.apply_envelope(envelope) {
            Err(ProjectionError::NonMonotonicSequence { last, found }) => {
                debug!(projection = self.name, last, found, "gap in stream, catching up");
                self.catch_up(store, envelope.institution_id(), envelope.aggregate_id())
            }
            other => other,
        }
    }

    /// Bring one stream's snapshot up to date with the store.
    pub fn catch_up<E: EventStore + ?Sized>(
        &self,
        store: &E,
        institution_id: InstitutionId,
        aggregate_id: AggregateId,
    ) -> Result<(), ProjectionError> {
        let _guard = self.catch_up.lock().map_err(|_| ProjectionError::Poisoned)?;

        let cursor = self
            .store
            .get(institution_id, &aggregate_id)
            .map(|s| s.version())
            .unwrap_or(0);
        let stream = store.load_stream(institution_id, aggregate_id)?;
        let pending: Vec<&StoredEvent> = stream.iter().filter(|e| e.sequence_number > cursor).collect();
        if pending.is_empty() {
            return Ok(());
        }

        debug!(
            projection = self.name,
            aggregate_id = %aggregate_id,
            from = cursor,
            events = pending.len(),
            "projection catch-up"
        );
        for stored in pending {
            self.apply_envelope(&stored.to_envelope())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coop_accounting::{
        AccountId, AccountType, CreateAccount, LEDGER_AGGREGATE_TYPE, Ledger, LedgerCommand, LedgerId,
    };

    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::InMemoryEventStore;

    fn projection() -> SnapshotProjection<Ledger> {
        SnapshotProjection::new("ledgers", LEDGER_AGGREGATE_TYPE, |id| Ledger::empty(LedgerId(id)))
    }

    fn add_account(
        dispatcher: &CommandDispatcher<InMemoryEventStore>,
        inst: InstitutionId,
        code: &str,
    ) -> Vec<StoredEvent> {
        let id = LedgerId::for_institution(inst);
        dispatcher
            .dispatch(
                inst,
                id.0,
                LEDGER_AGGREGATE_TYPE,
                LedgerCommand::CreateAccount(CreateAccount {
                    institution_id: inst,
                    account_id: AccountId::new(),
                    code: code.to_string(),
                    name: "Cash".to_string(),
                    account_type: AccountType::Asset,
                    parent_account_id: None,
                    occurred_at: Utc::now(),
                }),
                |_, agg| Ledger::empty(LedgerId(agg)),
            )
            .unwrap()
    }

    #[test]
    fn project_applies_in_place_and_locates() {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new());
        let projection = projection();
        let inst = InstitutionId::new();

        for code in ["1000", "1100"] {
            for stored in add_account(&dispatcher, inst, code) {
                projection.project(dispatcher.store(), &stored.to_envelope()).unwrap();
            }
        }

        let ledger_id = LedgerId::for_institution(inst).0;
        let (owner, ledger) = projection.find(ledger_id).unwrap();
        assert_eq!(owner, inst);
        assert_eq!(ledger.accounts().len(), 2);
        assert_eq!(projection.list(inst).len(), 1);
    }

    #[test]
    fn replayed_events_are_ignored() {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new());
        let projection = projection();
        let inst = InstitutionId::new();

        let committed = add_account(&dispatcher, inst, "1000");
        for _ in 0..3 {
            projection.apply_envelope(&committed[0].to_envelope()).unwrap();
        }
        let ledger = projection.get(inst, LedgerId::for_institution(inst).0).unwrap();
        assert_eq!(ledger.accounts().len(), 1);
    }

    #[test]
    fn gaps_are_detected() {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new());
        let projection = projection();
        let inst = InstitutionId::new();

        add_account(&dispatcher, inst, "1000");
        let second = add_account(&dispatcher, inst, "1100");
        let err = projection.apply_envelope(&second[0].to_envelope()).unwrap_err();
        assert!(matches!(err, ProjectionError::NonMonotonicSequence { last: 0, found: 2 }));

        // Catching up from the store repairs the gap.
        projection
            .catch_up(dispatcher.store(), inst, LedgerId::for_institution(inst).0)
            .unwrap();
        assert_eq!(
            projection.get(inst, LedgerId::for_institution(inst).0).unwrap().accounts().len(),
            2
        );
    }

    #[test]
    fn project_repairs_a_gap_from_the_store() {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new());
        let projection = projection();
        let inst = InstitutionId::new();
        let ledger_id = LedgerId::for_institution(inst).0;

        add_account(&dispatcher, inst, "1000");
        add_account(&dispatcher, inst, "2000");
        let third = add_account(&dispatcher, inst, "3000");
        projection.project(dispatcher.store(), &third[0].to_envelope()).unwrap();

        let ledger = projection.get(inst, ledger_id).unwrap();
        assert_eq!(ledger.accounts().len(), 3);
        assert_eq!(ledger.version(), 3);
    }
}
