use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coop_core::{InstitutionId, impl_uuid_newtype};

/// Identifier of a savings product.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavingsProductId(Uuid);

impl_uuid_newtype!(SavingsProductId, "SavingsProductId");

/// Kind of savings a product represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SavingsCategory {
    Regular,
    FixedDeposit,
    ShareCapital,
    Emergency,
}

impl SavingsCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SavingsCategory::Regular => "REGULAR",
            SavingsCategory::FixedDeposit => "FIXED_DEPOSIT",
            SavingsCategory::ShareCapital => "SHARE_CAPITAL",
            SavingsCategory::Emergency => "EMERGENCY",
        }
    }
}

/// A savings product offered by one SACCO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavingsProduct {
    pub id: SavingsProductId,
    pub institution_id: InstitutionId,
    pub name: String,
    pub category: SavingsCategory,
    /// Annual percent; zero when not given.
    pub interest_rate: Decimal,
    pub requires_maturity: bool,
    pub created_at: DateTime<Utc>,
}
