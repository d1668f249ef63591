//! Institution and member lookups.
//!
//! Onboarding and CRUD for institutions and members happen elsewhere; the
//! engine only reads them through these traits.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use coop_core::{DomainError, DomainResult, InstitutionId, MemberId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstitutionKind {
    Union,
    Sacco,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstitutionStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub id: InstitutionId,
    pub name: String,
    pub kind: InstitutionKind,
    pub status: InstitutionStatus,
    /// Annual percent applied to self-service loan applications.
    pub default_loan_interest_rate: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub full_name: String,
    pub member_number: String,
    pub sacco_id: InstitutionId,
}

pub trait InstitutionDirectory: Send + Sync {
    fn find_institution(&self, id: InstitutionId) -> Option<Institution>;

    fn institution(&self, id: InstitutionId) -> DomainResult<Institution> {
        self.find_institution(id)
            .ok_or_else(|| DomainError::not_found(format!("institution {id}")))
    }
}

pub trait MemberDirectory: Send + Sync {
    fn find_member(&self, id: MemberId) -> Option<Member>;

    fn member(&self, id: MemberId) -> DomainResult<Member> {
        self.find_member(id)
            .ok_or_else(|| DomainError::not_found(format!("member {id}")))
    }
}

impl<D: InstitutionDirectory + ?Sized> InstitutionDirectory for Arc<D> {
    fn find_institution(&self, id: InstitutionId) -> Option<Institution> {
        (**self).find_institution(id)
    }
}

impl<D: MemberDirectory + ?Sized> MemberDirectory for Arc<D> {
    fn find_member(&self, id: MemberId) -> Option<Member> {
        (**self).find_member(id)
    }
}

/// Both directories backed by in-process maps.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    institutions: RwLock<HashMap<InstitutionId, Institution>>,
    members: RwLock<HashMap<MemberId, Member>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_institution(&self, institution: Institution) {
        if let Ok(mut map) = self.institutions.write() {
            map.insert(institution.id, institution);
        }
    }

    pub fn insert_member(&self, member: Member) {
        if let Ok(mut map) = self.members.write() {
            map.insert(member.id, member);
        }
    }
}

impl InstitutionDirectory for InMemoryDirectory {
    fn find_institution(&self, id: InstitutionId) -> Option<Institution> {
        self.institutions.read().ok()?.get(&id).cloned()
    }
}

impl MemberDirectory for InMemoryDirectory {
    fn find_member(&self, id: MemberId) -> Option<Member> {
        self.members.read().ok()?.get(&id).cloned()
    }
}
