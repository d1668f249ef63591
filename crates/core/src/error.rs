//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant is detected before anything is persisted and is surfaced to
/// the caller verbatim. Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An institution, account, member, loan or installment does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Input failed validation (unbalanced entry, non-positive amount, bad installment).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The aggregate is in the wrong lifecycle state for the requested transition.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A withdrawal exceeds the available balance.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    /// The caller is not permitted to act within the institution scope.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Duplicate unique key or stale optimistic-concurrency version.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn insufficient_balance(requested: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance {
            requested,
            available,
        }
    }

    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::AccessDenied(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Stable machine-readable kind, independent of the message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::NotFound(_) => ErrorKind::NotFound,
            DomainError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DomainError::InvalidState(_) => ErrorKind::InvalidState,
            DomainError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            DomainError::AccessDenied(_) => ErrorKind::AccessDenied,
            DomainError::Conflict(_) => ErrorKind::Conflict,
        }
    }
}

/// Error taxonomy without payload, convenient for matching at call sites.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    InvalidState,
    InsufficientBalance,
    AccessDenied,
    Conflict,
    Infrastructure,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn insufficient_balance_message_includes_amounts() {
        let err = DomainError::insufficient_balance(dec!(600.00), dec!(500.00));
        assert_eq!(
            err.to_string(),
            "insufficient balance: requested 600.00, available 500.00"
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
    }

    #[test]
    fn kinds_map_one_to_one() {
        assert_eq!(DomainError::not_found("loan").kind(), ErrorKind::NotFound);
        assert_eq!(DomainError::conflict("dup").kind(), ErrorKind::Conflict);
        assert_eq!(
            DomainError::invalid_state("not pending").kind(),
            ErrorKind::InvalidState
        );
    }
}
