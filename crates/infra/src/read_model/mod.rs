//! Institution-isolated read model storage abstractions.

pub mod institution_store;

pub use institution_store::{InMemoryInstitutionStore, InstitutionStore};
