//! Exact-decimal money and rate arithmetic.
//!
//! Money is `rust_decimal::Decimal` with two fractional digits, rounded
//! half-up (midpoint away from zero). Intermediate rate math keeps six.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{DomainError, DomainResult};

/// Fractional digits carried by monetary amounts.
pub const MONEY_SCALE: u32 = 2;

/// Fractional digits carried by intermediate rate computations.
pub const RATE_SCALE: u32 = 6;

/// Largest amount accepted on a single monetary input (10^15).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_764_472_320, 232_830, 0, false, 0);

/// Round to cents, half-up.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round to rate precision, half-up.
pub fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Validate a non-negative amount with at most two fractional digits and no
/// larger than [`MAX_AMOUNT`].
///
/// Returns the amount rescaled to exactly two digits.
pub fn ensure_money(value: Decimal, what: &str) -> DomainResult<Decimal> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(DomainError::invalid_argument(format!(
            "{what} must not be negative"
        )));
    }
    if value.normalize().scale() > MONEY_SCALE {
        return Err(DomainError::invalid_argument(format!(
            "{what} must have at most {MONEY_SCALE} fractional digits"
        )));
    }
    if value > MAX_AMOUNT {
        return Err(DomainError::invalid_argument(format!(
            "{what} must not exceed {MAX_AMOUNT}"
        )));
    }
    let mut v = value;
    v.rescale(MONEY_SCALE);
    Ok(v)
}

/// Validate a strictly positive amount with at most two fractional digits.
pub fn ensure_positive_money(value: Decimal, what: &str) -> DomainResult<Decimal> {
    let v = ensure_money(value, what)?;
    if v.is_zero() {
        return Err(DomainError::invalid_argument(format!("{what} must be positive")));
    }
    Ok(v)
}

/// Add two amounts, failing instead of overflowing.
pub fn checked_add_money(a: Decimal, b: Decimal, what: &str) -> DomainResult<Decimal> {
    a.checked_add(b).ok_or_else(|| out_of_range(what))
}

/// InvalidArgument for arithmetic that leaves the representable range.
pub fn out_of_range(what: &str) -> DomainError {
    DomainError::invalid_argument(format!("{what} out of range"))
}
