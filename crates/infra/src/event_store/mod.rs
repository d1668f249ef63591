//! Append-only event store boundary.
//!
//! Institution-scoped event streams with optimistic concurrency and atomic
//! multi-stream commits, without any storage assumptions.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
