//! Error types for SimpleBank ledger operations.

use crate::{AccountId, Currency};
use thiserror::Error;

/// Main error type for ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Request shape or row constraint violated (non-positive amount,
    /// identical accounts, balance overflow, referenced row deletion).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Storage backend failed or the atomic unit could not commit.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Caller deadline elapsed or a lock wait timed out.
    #[error("Canceled: {0}")]
    Canceled(String),

    /// Account currency differs from the requested one.
    #[error("Currency mismatch on account {account_id}: expected {expected}, got {actual}")]
    CurrencyMismatch {
        account_id: AccountId,
        expected: Currency,
        actual: Currency,
    },

    /// Currency code outside the supported set.
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl LedgerError {
    /// Shorthand for a missing account.
    pub fn account_not_found(id: AccountId) -> Self {
        LedgerError::NotFound {
            entity: "account",
            id: id.get(),
        }
    }

    /// Check if the caller may retry the whole operation.
    ///
    /// A retried transfer is a new transfer; the engine never deduplicates.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::StorageFailure(_) | LedgerError::Canceled(_)
        )
    }

    /// Get error code for the outer service layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::ConstraintViolation(_) => "CONSTRAINT_VIOLATION",
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::StorageFailure(_) => "STORAGE_FAILURE",
            LedgerError::Canceled(_) => "CANCELED",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            LedgerError::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
