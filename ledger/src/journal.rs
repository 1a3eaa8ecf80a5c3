//! Ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simplebank_common::{AccountId, EntryId, MinorUnits};

/// Direction of an entry, derived from the sign of its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Funds leaving the account.
    Debit,
    /// Funds arriving in the account.
    Credit,
}

/// An immutable signed movement of funds against one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique entry ID.
    pub id: EntryId,
    /// Account affected.
    pub account_id: AccountId,
    /// Signed amount: negative debits, positive credits.
    pub amount: MinorUnits,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

impl Entry {
    /// Direction of this entry.
    pub fn kind(&self) -> EntryKind {
        if self.amount < 0 {
            EntryKind::Debit
        } else {
            EntryKind::Credit
        }
    }
}

/// Check that a set of entries nets to zero.
pub fn is_balanced(entries: &[Entry]) -> bool {
    entries
        .iter()
        .try_fold(0_i64, |acc, entry| acc.checked_add(entry.amount))
        == Some(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, account: i64, amount: MinorUnits) -> Entry {
        Entry {
            id: EntryId::new(id),
            account_id: AccountId::new(account),
            amount,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_entry_kind() {
        assert_eq!(entry(1, 1, -10).kind(), EntryKind::Debit);
        assert_eq!(entry(2, 2, 10).kind(), EntryKind::Credit);
    }

    #[test]
    fn test_balanced_pair() {
        let entries = vec![entry(1, 1, -1000), entry(2, 2, 1000)];
        assert!(is_balanced(&entries));
    }

    #[test]
    fn test_unbalanced_entries() {
        assert!(!is_balanced(&[entry(1, 1, -1000)]));
        assert!(!is_balanced(&[entry(1, 1, i64::MAX), entry(2, 2, 1)]));
    }
}
