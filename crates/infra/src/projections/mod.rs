//! Projection implementations (read model builders).
//!
//! Projections consume committed events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event stream
//! - **Institution-isolated**: data is partitioned by institution
//! - **Idempotent**: events at or below a stream's cursor are ignored

pub mod snapshot;

pub use snapshot::{ProjectionError, SnapshotProjection};
