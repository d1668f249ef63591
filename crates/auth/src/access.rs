use thiserror::Error;
use tracing::warn;

use coop_core::{DomainError, InstitutionId, MemberId};

use crate::{CallerContext, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("access denied to institution {0}")]
    InstitutionScope(InstitutionId),

    #[error("self-service caller may only act on their own records")]
    NotOwnRecord,
}

impl From<AccessError> for DomainError {
    fn from(value: AccessError) -> Self {
        DomainError::access_denied(value.to_string())
    }
}

/// Access-control decision interface consumed by the engine.
///
/// Policy *enforcement* of roles and permissions lives outside; the engine
/// only asks whether a caller may act within an institution scope.
pub trait AccessPolicy: Send + Sync {
    fn can_access_institution(&self, caller: &CallerContext, institution_id: InstitutionId) -> bool;
}

impl<P> AccessPolicy for std::sync::Arc<P>
where
    P: AccessPolicy + ?Sized,
{
    fn can_access_institution(&self, caller: &CallerContext, institution_id: InstitutionId) -> bool {
        (**self).can_access_institution(caller, institution_id)
    }
}

/// Default policy: super admins reach every institution, everybody else only
/// the institution they belong to.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstitutionScopePolicy;

impl AccessPolicy for InstitutionScopePolicy {
    fn can_access_institution(&self, caller: &CallerContext, institution_id: InstitutionId) -> bool {
        if caller.role() == Role::SuperAdmin {
            return true;
        }
        caller.institution_id() == Some(institution_id)
    }
}

/// Check the institution scope, logging denials.
pub fn ensure_institution_access<P: AccessPolicy + ?Sized>(
    policy: &P,
    caller: &CallerContext,
    institution_id: InstitutionId,
) -> Result<(), AccessError> {
    if policy.can_access_institution(caller, institution_id) {
        Ok(())
    } else {
        warn!(
            user = %caller.username(),
            role = %caller.role(),
            institution = %institution_id,
            "institution access denied"
        );
        Err(AccessError::InstitutionScope(institution_id))
    }
}

/// Self-service callers may only touch their own member record; staff pass.
pub fn ensure_own_member(caller: &CallerContext, member_id: MemberId) -> Result<(), AccessError> {
    if !caller.is_self_service() {
        return Ok(());
    }
    if caller.member_id() == Some(member_id) {
        Ok(())
    } else {
        Err(AccessError::NotOwnRecord)
    }
}
