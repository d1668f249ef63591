use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coop_core::{AggregateId, InstitutionId};

/// A committed event as read-side consumers see it: the stream position
/// plus the serialized payload.
///
/// Every envelope belongs to exactly one institution; projections key
/// their state by `(institution_id, aggregate_id)` and never look across.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    institution_id: InstitutionId,
    aggregate_id: AggregateId,
    aggregate_type: String,
    event_type: String,
    /// 1-based position in the stream; equals the stream version after this event.
    sequence_number: u64,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        institution_id: InstitutionId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            institution_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn institution_id(&self) -> InstitutionId {
        self.institution_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// e.g. `"savings.account.transaction_recorded"`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }
}
