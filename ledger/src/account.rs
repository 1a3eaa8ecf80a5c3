//! Account records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simplebank_common::{AccountId, Currency, LedgerError, MinorUnits, Result};

/// A ledger account.
///
/// Only `balance` ever changes after creation, and only through a signed
/// delta applied inside an atomic unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Owning account holder.
    pub owner: String,
    /// Current balance in minor units.
    pub balance: MinorUnits,
    /// Account currency, fixed at creation.
    pub currency: Currency,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Reject the account unless it is held in `currency`.
    ///
    /// Currency policy belongs to the caller of the transfer engine; this is the
    /// check a request layer runs on both accounts before invoking it.
    pub fn ensure_currency(&self, currency: Currency) -> Result<()> {
        if self.currency != currency {
            return Err(LedgerError::CurrencyMismatch {
                account_id: self.id,
                expected: currency,
                actual: self.currency,
            });
        }
        Ok(())
    }
}

/// Parameters for provisioning a new account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub owner: String,
    pub balance: MinorUnits,
    pub currency: Currency,
}

impl NewAccount {
    /// Create provisioning parameters.
    pub fn new(owner: impl Into<String>, balance: MinorUnits, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            balance,
            currency,
        }
    }

    /// Validate the parameters.
    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            return Err(LedgerError::ConstraintViolation(
                "account owner cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
