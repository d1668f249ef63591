//! Per-institution savings registry.
//!
//! Owns the product catalog and hands out account numbers, and remembers
//! which (member, product) pairs already hold an account.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coop_core::{Aggregate, AggregateId, AggregateRoot, DomainError, InstitutionId, MemberId};
use coop_events::Event;

use crate::{SavingsAccountId, SavingsCategory, SavingsProduct, SavingsProductId};

/// Stream type tag for registry events.
pub const REGISTRY_AGGREGATE_TYPE: &str = "savings.registry";

const REGISTRY_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_3a52_9d0e_4b7a_8f21_5e4c_0b9a_7d13);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryId(pub AggregateId);

impl RegistryId {
    pub fn for_institution(institution_id: InstitutionId) -> Self {
        Self(AggregateId::derived(
            &REGISTRY_NAMESPACE,
            institution_id.as_uuid().as_bytes(),
        ))
    }
}

impl core::fmt::Display for RegistryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Human account number, `SAV-NNNNNN`.
pub fn format_account_number(sequence: u64) -> String {
    format!("SAV-{sequence:06}")
}

/// Aggregate root: SavingsRegistry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavingsRegistry {
    id: RegistryId,
    institution_id: Option<InstitutionId>,
    products: Vec<SavingsProduct>,
    product_index: HashMap<SavingsProductId, usize>,
    holdings: HashMap<(MemberId, SavingsProductId), SavingsAccountId>,
    issued_numbers: u64,
    version: u64,
}

impl SavingsRegistry {
    pub fn empty(id: RegistryId) -> Self {
        Self {
            id,
            institution_id: None,
            products: Vec::new(),
            product_index: HashMap::new(),
            holdings: HashMap::new(),
            issued_numbers: 0,
            version: 0,
        }
    }

    pub fn for_institution(institution_id: InstitutionId) -> Self {
        Self::empty(RegistryId::for_institution(institution_id))
    }

    pub fn institution_id(&self) -> Option<InstitutionId> {
        self.institution_id
    }

    pub fn products(&self) -> &[SavingsProduct] {
        &self.products
    }

    pub fn product(&self, id: SavingsProductId) -> Option<&SavingsProduct> {
        self.product_index.get(&id).map(|&idx| &self.products[idx])
    }

    pub fn account_for(&self, member_id: MemberId, product_id: SavingsProductId) -> Option<SavingsAccountId> {
        self.holdings.get(&(member_id, product_id)).copied()
    }

    pub fn issued_numbers(&self) -> u64 {
        self.issued_numbers
    }
}

impl AggregateRoot for SavingsRegistry {
    type Id = RegistryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub institution_id: InstitutionId,
    pub product_id: SavingsProductId,
    pub name: String,
    pub category: SavingsCategory,
    pub interest_rate: Option<Decimal>,
    pub requires_maturity: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterAccount (reserve a number for a new member account).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAccount {
    pub institution_id: InstitutionId,
    pub account_id: SavingsAccountId,
    pub member_id: MemberId,
    pub product_id: SavingsProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryCommand {
    CreateProduct(CreateProduct),
    RegisterAccount(RegisterAccount),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub product: SavingsProduct,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AccountRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRegistered {
    pub institution_id: InstitutionId,
    pub account_id: SavingsAccountId,
    pub member_id: MemberId,
    pub product_id: SavingsProductId,
    pub account_number: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    ProductCreated(ProductCreated),
    AccountRegistered(AccountRegistered),
}

impl Event for RegistryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RegistryEvent::ProductCreated(_) => "savings.registry.product_created",
            RegistryEvent::AccountRegistered(_) => "savings.registry.account_registered",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RegistryEvent::ProductCreated(e) => e.occurred_at,
            RegistryEvent::AccountRegistered(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SavingsRegistry {
    type Command = RegistryCommand;
    type Event = RegistryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RegistryEvent::ProductCreated(e) => {
                self.institution_id.get_or_insert(e.product.institution_id);
                self.product_index.insert(e.product.id, self.products.len());
                self.products.push(e.product.clone());
            }
            RegistryEvent::AccountRegistered(e) => {
                self.institution_id.get_or_insert(e.institution_id);
                self.holdings.insert((e.member_id, e.product_id), e.account_id);
                self.issued_numbers += 1;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RegistryCommand::CreateProduct(cmd) => {
                self.ensure_institution(cmd.institution_id)?;
                let name = cmd.name.trim();
                if name.is_empty() {
                    return Err(DomainError::invalid_argument("product name must not be empty"));
                }
                let interest_rate = cmd.interest_rate.unwrap_or(Decimal::ZERO);
                if interest_rate < Decimal::ZERO {
                    return Err(DomainError::invalid_argument(
                        "interest rate must not be negative",
                    ));
                }
                if self.product(cmd.product_id).is_some() {
                    return Err(DomainError::conflict(format!(
                        "savings product {} already exists",
                        cmd.product_id
                    )));
                }

                Ok(vec![RegistryEvent::ProductCreated(ProductCreated {
                    product: SavingsProduct {
                        id: cmd.product_id,
                        institution_id: cmd.institution_id,
                        name: name.to_string(),
                        category: cmd.category,
                        interest_rate,
                        requires_maturity: cmd.requires_maturity,
                        created_at: cmd.occurred_at,
                    },
                    occurred_at: cmd.occurred_at,
                })])
            }
            RegistryCommand::RegisterAccount(cmd) => {
                self.ensure_institution(cmd.institution_id)?;
                if self.product(cmd.product_id).is_none() {
                    return Err(DomainError::not_found(format!(
                        "savings product {}",
                        cmd.product_id
                    )));
                }
                if self.account_for(cmd.member_id, cmd.product_id).is_some() {
                    return Err(DomainError::conflict(
                        "member already has an account for this product",
                    ));
                }

                Ok(vec![RegistryEvent::AccountRegistered(AccountRegistered {
                    institution_id: cmd.institution_id,
                    account_id: cmd.account_id,
                    member_id: cmd.member_id,
                    product_id: cmd.product_id,
                    account_number: format_account_number(self.issued_numbers + 1),
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl SavingsRegistry {
    fn ensure_institution(&self, institution_id: InstitutionId) -> Result<(), DomainError> {
        match self.institution_id {
            Some(owner) if owner != institution_id => Err(DomainError::invalid_argument(
                "registry belongs to a different institution",
            )),
            _ => Ok(()),
        }
    }
}
