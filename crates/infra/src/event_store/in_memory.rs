use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use coop_core::{AggregateId, InstitutionId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    institution_id: InstitutionId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
struct Streams {
    by_key: HashMap<StreamKey, Vec<StoredEvent>>,
    /// Commit order across streams: stream key and index within the stream.
    log: Vec<(StreamKey, usize)>,
}

/// In-memory append-only event store.
///
/// A single write lock covers the whole commit, so multi-stream appends are
/// atomic and version checks cannot interleave.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<Streams>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// Total number of stored events across all streams.
    pub fn event_count(&self) -> usize {
        self.streams
            .read()
            .map(|streams| streams.log.len())
            .unwrap_or(0)
    }
}

/// Checks that a batch targets a single stream with a single aggregate type.
fn batch_key(events: &[UncommittedEvent]) -> Result<(StreamKey, String), EventStoreError> {
    let first = events
        .first()
        .ok_or_else(|| EventStoreError::InvalidAppend("empty batch".to_string()))?;
    let institution_id = first.institution_id;
    let aggregate_id = first.aggregate_id;
    let aggregate_type = first.aggregate_type.clone();

    for (idx, e) in events.iter().enumerate() {
        if e.institution_id != institution_id {
            return Err(EventStoreError::IsolationViolation(format!(
                "batch contains multiple institution_ids (index {idx})"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_ids (index {idx})"
            )));
        }
        if e.aggregate_type != aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch contains multiple aggregate_types (index {idx})"
            )));
        }
    }

    Ok((
        StreamKey {
            institution_id,
            aggregate_id,
        },
        aggregate_type,
    ))
}

impl EventStore for InMemoryEventStore {
    fn append_atomic(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let batches: Vec<StreamAppend> = batches.into_iter().filter(|b| !b.is_empty()).collect();
        if batches.is_empty() {
            return Ok(vec![]);
        }

        let mut keyed = Vec::with_capacity(batches.len());
        let mut seen = HashSet::new();
        for batch in batches {
            let (key, aggregate_type) = batch_key(&batch.events)?;
            if !seen.insert(key) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream {} appears twice in one commit",
                    key.aggregate_id
                )));
            }
            keyed.push((key, aggregate_type, batch));
        }

        let mut guard = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;
        let streams = &mut *guard;

        // Validate every stream before touching any of them.
        for (key, aggregate_type, batch) in &keyed {
            let stream = streams.by_key.get(key).map(Vec::as_slice).unwrap_or(&[]);
            let current = Self::current_version(stream);
            if !batch.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    key.aggregate_id, batch.expected_version
                )));
            }
            if let Some(existing) = stream.first() {
                if &existing.aggregate_type != aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, aggregate_type
                    )));
                }
            }
        }

        let mut committed = Vec::new();
        for (key, _, batch) in keyed {
            let stream = streams.by_key.entry(key).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in batch.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    institution_id: e.institution_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                streams.log.push((key, stream.len()));
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        institution_id: InstitutionId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            institution_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(streams.by_key.get(&key).cloned().unwrap_or_default())
    }

    fn load_since(&self, position: u64) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        let skip = usize::try_from(position).unwrap_or(usize::MAX);
        Ok(streams
            .log
            .iter()
            .skip(skip)
            .filter_map(|(key, idx)| streams.by_key.get(key).and_then(|s| s.get(*idx)).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coop_core::ExpectedVersion;
    use serde_json::json;
    use uuid::Uuid;

    fn event(institution_id: InstitutionId, aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            institution_id,
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.event".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({}),
        }
    }

    #[test]
    fn sequence_numbers_start_at_one_and_continue() {
        let store = InMemoryEventStore::new();
        let inst = InstitutionId::new();
        let agg = AggregateId::new();

        let first = store
            .append(vec![event(inst, agg, "t"), event(inst, agg, "t")], ExpectedVersion::NoStream)
            .unwrap();
        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1, 2]);

        let second = store.append(vec![event(inst, agg, "t")], ExpectedVersion::Exact(2)).unwrap();
        assert_eq!(second[0].sequence_number, 3);
        assert_eq!(store.load_stream(inst, agg).unwrap().len(), 3);
    }

    #[test]
    fn stale_version_fails_whole_commit() {
        let store = InMemoryEventStore::new();
        let inst = InstitutionId::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store.append(vec![event(inst, b, "t")], ExpectedVersion::NoStream).unwrap();

        let err = store
            .append_atomic(vec![
                StreamAppend::new(vec![event(inst, a, "t")], ExpectedVersion::NoStream),
                StreamAppend::new(vec![event(inst, b, "t")], ExpectedVersion::NoStream),
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert!(store.load_stream(inst, a).unwrap().is_empty());
        assert_eq!(store.event_count(), 1);
    }

    #[test]
    fn multi_stream_commit_lands_in_both_streams() {
        let store = InMemoryEventStore::new();
        let inst = InstitutionId::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        let committed = store
            .append_atomic(vec![
                StreamAppend::new(vec![event(inst, a, "x")], ExpectedVersion::NoStream),
                StreamAppend::new(vec![event(inst, b, "y"), event(inst, b, "y")], ExpectedVersion::NoStream),
            ])
            .unwrap();
        assert_eq!(committed.len(), 3);
        assert_eq!(store.load_stream(inst, b).unwrap().len(), 2);
    }

    #[test]
    fn commit_log_replays_across_streams_in_commit_order() {
        let store = InMemoryEventStore::new();
        let inst = InstitutionId::new();
        let other = InstitutionId::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        store.append(vec![event(inst, a, "x")], ExpectedVersion::NoStream).unwrap();
        store
            .append_atomic(vec![
                StreamAppend::new(vec![event(other, b, "y")], ExpectedVersion::NoStream),
                StreamAppend::new(vec![event(inst, a, "x")], ExpectedVersion::Exact(1)),
            ])
            .unwrap();

        let all = store.load_since(0).unwrap();
        let order: Vec<(AggregateId, u64)> = all.iter().map(|e| (e.aggregate_id, e.sequence_number)).collect();
        assert_eq!(order, vec![(a, 1), (b, 1), (a, 2)]);

        let tail = store.load_since(2).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].aggregate_id, a);
        assert!(store.load_since(3).unwrap().is_empty());
        assert!(store.load_since(u64::MAX).unwrap().is_empty());
    }

    #[test]
    fn same_stream_twice_is_rejected() {
        let store = InMemoryEventStore::new();
        let inst = InstitutionId::new();
        let a = AggregateId::new();
        let err = store
            .append_atomic(vec![
                StreamAppend::new(vec![event(inst, a, "t")], ExpectedVersion::Any),
                StreamAppend::new(vec![event(inst, a, "t")], ExpectedVersion::Any),
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn streams_are_isolated_per_institution() {
        let store = InMemoryEventStore::new();
        let agg = AggregateId::new();
        let inst = InstitutionId::new();
        store.append(vec![event(inst, agg, "t")], ExpectedVersion::NoStream).unwrap();
        assert!(store.load_stream(InstitutionId::new(), agg).unwrap().is_empty());

        let err = store
            .append(
                vec![event(inst, agg, "t"), event(InstitutionId::new(), agg, "t")],
                ExpectedVersion::Any,
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::IsolationViolation(_)));
    }

    #[test]
    fn aggregate_type_is_stable_per_stream() {
        let store = InMemoryEventStore::new();
        let inst = InstitutionId::new();
        let agg = AggregateId::new();
        store.append(vec![event(inst, agg, "loans.loan")], ExpectedVersion::NoStream).unwrap();
        let err = store
            .append(vec![event(inst, agg, "savings.account")], ExpectedVersion::Exact(1))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    proptest::proptest! {
        #[test]
        fn sequence_numbers_stay_contiguous(batches in proptest::collection::vec(1usize..5, 1..12)) {
            let store = InMemoryEventStore::new();
            let inst = InstitutionId::new();
            let agg = AggregateId::new();

            let mut version = 0u64;
            for size in batches {
                let events = (0..size).map(|_| event(inst, agg, "t")).collect();
                let expected = if version == 0 { ExpectedVersion::NoStream } else { ExpectedVersion::Exact(version) };
                store.append(events, expected).unwrap();
                version += size as u64;
            }

            let stream = store.load_stream(inst, agg).unwrap();
            let seqs: Vec<u64> = stream.iter().map(|e| e.sequence_number).collect();
            proptest::prop_assert_eq!(seqs, (1..=version).collect::<Vec<_>>());
        }
    }
}
