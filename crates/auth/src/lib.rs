//! `coop-auth` — caller identity and the access-control decision interface.
//!
//! Authentication, sessions and role assignment live outside the engine.

pub mod access;
pub mod caller;
pub mod roles;

pub use access::{
    AccessError, AccessPolicy, InstitutionScopePolicy, ensure_institution_access,
    ensure_own_member,
};
pub use caller::CallerContext;
pub use roles::Role;
