//! Transfer records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simplebank_common::{AccountId, LedgerError, MinorUnits, Result, TransferId};

/// A paired debit/credit across two accounts, recorded once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique transfer ID.
    pub id: TransferId,
    /// Account debited.
    pub from_account_id: AccountId,
    /// Account credited.
    pub to_account_id: AccountId,
    /// Positive amount moved.
    pub amount: MinorUnits,
    /// When the transfer was recorded.
    pub created_at: DateTime<Utc>,
}

/// Row constraints shared by every store backend.
pub fn check_transfer_shape(
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: MinorUnits,
) -> Result<()> {
    if amount <= 0 {
        return Err(LedgerError::ConstraintViolation(format!(
            "transfer amount must be positive, got {}",
            amount
        )));
    }
    if from_account_id == to_account_id {
        return Err(LedgerError::ConstraintViolation(format!(
            "cannot transfer from account {} to itself",
            from_account_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_accepts_positive_distinct() {
        assert!(check_transfer_shape(AccountId::new(1), AccountId::new(2), 1).is_ok());
    }

    #[test]
    fn test_shape_rejects_degenerate_input() {
        let a = AccountId::new(1);
        let b = AccountId::new(2);
        assert!(check_transfer_shape(a, b, 0).is_err());
        assert!(check_transfer_shape(a, b, -5).is_err());
        assert!(matches!(
            check_transfer_shape(a, a, 10),
            Err(LedgerError::ConstraintViolation(_))
        ));
    }
}
