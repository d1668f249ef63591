//! Engine configuration.
//!
//! Defaults suit a single SACCO deployment; every field can be overridden
//! through a `COOP_*` environment variable.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use coop_loans::{AllocationPolicy, ScheduleRounding};

pub const ENV_FALLBACK_LOAN_RATE: &str = "COOP_FALLBACK_LOAN_RATE";
pub const ENV_ALLOCATION_POLICY: &str = "COOP_ALLOCATION_POLICY";
pub const ENV_SCHEDULE_ROUNDING: &str = "COOP_SCHEDULE_ROUNDING";
pub const ENV_CASH_ACCOUNT_CODE: &str = "COOP_CASH_ACCOUNT_CODE";
pub const ENV_CASH_ACCOUNT_NAME: &str = "COOP_CASH_ACCOUNT_NAME";
pub const ENV_MAX_CONFLICT_RETRIES: &str = "COOP_MAX_CONFLICT_RETRIES";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Annual percent used when neither the caller nor the institution gives a rate.
    pub fallback_loan_interest_rate: Decimal,
    pub allocation_policy: AllocationPolicy,
    pub schedule_rounding: ScheduleRounding,
    pub cash_account_code: String,
    pub cash_account_name: String,
    pub max_conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_loan_interest_rate: Decimal::from(12),
            allocation_policy: AllocationPolicy::InterestFirst,
            schedule_rounding: ScheduleRounding::BalanceFinalInstallment,
            cash_account_code: "1000".to_string(),
            cash_account_name: "Cash".to_string(),
            max_conflict_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_FALLBACK_LOAN_RATE) {
            let rate: Decimal = parse(ENV_FALLBACK_LOAN_RATE, &raw)?;
            if rate < Decimal::ZERO {
                return Err(invalid(ENV_FALLBACK_LOAN_RATE, &raw, "must not be negative"));
            }
            config.fallback_loan_interest_rate = rate;
        }
        if let Some(raw) = lookup(ENV_ALLOCATION_POLICY) {
            config.allocation_policy = parse(ENV_ALLOCATION_POLICY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SCHEDULE_ROUNDING) {
            config.schedule_rounding = parse(ENV_SCHEDULE_ROUNDING, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CASH_ACCOUNT_CODE) {
            config.cash_account_code = non_blank(ENV_CASH_ACCOUNT_CODE, raw)?;
        }
        if let Some(raw) = lookup(ENV_CASH_ACCOUNT_NAME) {
            config.cash_account_name = non_blank(ENV_CASH_ACCOUNT_NAME, raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_CONFLICT_RETRIES) {
            config.max_conflict_retries = parse(ENV_MAX_CONFLICT_RETRIES, &raw)?;
        }

        Ok(config)
    }
}

fn invalid(var: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    raw.trim().parse::<T>().map_err(|e| invalid(var, raw, e))
}

fn non_blank(var: &'static str, raw: String) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid(var, &raw, "must not be blank"));
    }
    Ok(trimmed.to_string())
}
