//! `coop-events` — event contract shared by the domain crates and the store.

pub mod envelope;
pub mod event;

pub use envelope::EventEnvelope;
pub use event::Event;
