use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use coop_core::{AggregateId, ExpectedVersion, InstitutionId};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// ## Event Lifecycle
///
/// 1. **Domain event**: produced by an aggregate's `handle()`
/// 2. **UncommittedEvent**: serialized and wrapped with stream metadata
/// 3. **StoredEvent**: persisted with an assigned `sequence_number`
/// 4. **EventEnvelope**: typed view handed to read-side consumers
///
/// Use `UncommittedEvent::from_typed()` to build one from a typed domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub institution_id: InstitutionId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are per stream `(institution_id, aggregate_id)`, start at 1,
/// and have no gaps. The last sequence number of a stream is its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub institution_id: InstitutionId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an institution-scoped envelope.
    pub fn to_envelope(&self) -> coop_events::EventEnvelope<JsonValue> {
        coop_events::EventEnvelope::new(
            self.event_id,
            self.institution_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.event_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// One stream's share of an atomic commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub events: Vec<UncommittedEvent>,
    pub expected_version: ExpectedVersion,
}

impl StreamAppend {
    pub fn new(events: Vec<UncommittedEvent>, expected_version: ExpectedVersion) -> Self {
        Self {
            events,
            expected_version,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, isolation) as
/// opposed to domain errors.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("institution isolation violation: {0}")]
    IsolationViolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Append-only, institution-scoped event store.
///
/// Streams are keyed by `(institution_id, aggregate_id)`. Within a stream,
/// events carry sequence numbers 1, 2, 3, ...
///
/// ## Append Semantics
///
/// `append_atomic()` takes one `StreamAppend` per touched stream and:
/// - validates that every batch targets exactly one stream and aggregate type
/// - checks each stream's `ExpectedVersion` before writing anything
/// - assigns sequence numbers starting at `current_version + 1`
/// - persists all batches or none of them
///
/// A commit touching the same stream twice is rejected.
///
/// ## Load Semantics
///
/// `load_stream()` returns the stream in sequence order, or an empty vector
/// when the aggregate does not exist yet.
///
/// `load_since()` reads the store-wide commit log: every event in commit
/// order, skipping the first `position` of them. Events of one stream keep
/// their sequence order in the log.
pub trait EventStore: Send + Sync {
    /// Append to several streams as one all-or-nothing unit.
    ///
    /// Returns the committed events of every batch, in batch order.
    fn append_atomic(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for an institution + aggregate.
    fn load_stream(
        &self,
        institution_id: InstitutionId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Events committed after the first `position` events, across all
    /// streams and institutions.
    fn load_since(&self, position: u64) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Append events to a single aggregate stream.
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.append_atomic(vec![StreamAppend::new(events, expected_version)])
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append_atomic(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append_atomic(batches)
    }

    fn load_stream(
        &self,
        institution_id: InstitutionId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(institution_id, aggregate_id)
    }

    fn load_since(&self, position: u64) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_since(position)
    }
}

impl UncommittedEvent {
    /// Serialize a typed domain event, capturing the metadata needed to
    /// decode it again.
    pub fn from_typed<E>(
        institution_id: InstitutionId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: coop_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::InvalidAppend(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id,
            institution_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
