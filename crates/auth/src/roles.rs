use serde::{Deserialize, Serialize};

/// Role of the calling back-office user.
///
/// Role *assignment* happens outside the engine; the engine only reads the
/// role to pick defaults (self-service rate, self-only access) and to make
/// the institution-scope decision.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    UnionAdmin,
    SaccoAdmin,
    SaccoEmployee,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::UnionAdmin => "UNION_ADMIN",
            Role::SaccoAdmin => "SACCO_ADMIN",
            Role::SaccoEmployee => "SACCO_EMPLOYEE",
            Role::Member => "MEMBER",
        }
    }

    /// Self-service roles act only on their own member record.
    pub fn is_self_service(&self) -> bool {
        matches!(self, Role::Member)
    }

    /// Staff roles operate on behalf of members.
    pub fn is_staff(&self) -> bool {
        !self.is_self_service()
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
