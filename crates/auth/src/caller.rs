use serde::{Deserialize, Serialize};

use coop_core::{InstitutionId, MemberId, UserId};

use crate::Role;

/// Explicit identity of whoever invokes an engine operation.
///
/// Passed into every public operation; there is no ambient "current user".
/// Authentication happened upstream; this value is trusted as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    user_id: UserId,
    username: String,
    role: Role,
    /// Institution the caller belongs to (`None` for global super admins).
    institution_id: Option<InstitutionId>,
    /// Member record linked to a self-service caller.
    member_id: Option<MemberId>,
}

impl CallerContext {
    pub fn new(
        user_id: UserId,
        username: impl Into<String>,
        role: Role,
        institution_id: Option<InstitutionId>,
        member_id: Option<MemberId>,
    ) -> Self {
        Self {
            user_id,
            username: username.into(),
            role,
            institution_id,
            member_id,
        }
    }

    /// A global administrator not bound to any institution.
    pub fn super_admin(user_id: UserId, username: impl Into<String>) -> Self {
        Self::new(user_id, username, Role::SuperAdmin, None, None)
    }

    /// A staff user working inside one institution.
    pub fn staff(
        user_id: UserId,
        username: impl Into<String>,
        role: Role,
        institution_id: InstitutionId,
    ) -> Self {
        Self::new(user_id, username, role, Some(institution_id), None)
    }

    /// A member using self-service.
    pub fn member(
        user_id: UserId,
        username: impl Into<String>,
        institution_id: InstitutionId,
        member_id: MemberId,
    ) -> Self {
        Self::new(
            user_id,
            username,
            Role::Member,
            Some(institution_id),
            Some(member_id),
        )
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn institution_id(&self) -> Option<InstitutionId> {
        self.institution_id
    }

    pub fn member_id(&self) -> Option<MemberId> {
        self.member_id
    }

    pub fn is_self_service(&self) -> bool {
        self.role.is_self_service()
    }
}
