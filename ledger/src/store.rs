//! Ledger store contract.
//!
//! A [`LedgerStore`] is the shared handle to durable storage. Everything that
//! mutates balances goes through a [`LedgerUnit`], an open atomic unit obtained
//! from [`LedgerStore::begin`]. A unit that is dropped without `commit` leaves
//! no trace.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use simplebank_common::{
    AccountId, Currency, EntryId, LedgerError, MinorUnits, Result, TransferId,
};

use crate::account::{Account, NewAccount};
use crate::journal::Entry;
use crate::transfer::Transfer;

/// Transaction isolation requested for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Each statement sees rows committed before it started. Sufficient for
    /// transfers because balances are only touched under row locks.
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling of the level.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Parse a configuration value such as `read_committed`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "read_committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable_read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            other => Err(LedgerError::ConfigurationError(format!(
                "unknown isolation level: {}",
                other
            ))),
        }
    }
}

/// Options for one atomic unit.
#[derive(Debug, Clone, Default)]
pub struct UnitOptions {
    /// Isolation level of the unit.
    pub isolation: IsolationLevel,
    /// Upper bound on a single row-lock wait.
    pub lock_timeout: Option<Duration>,
    /// Caller deadline for the whole unit.
    pub deadline: Option<Instant>,
    /// Correlation id attached to log records of this unit.
    pub correlation_id: Option<String>,
}

impl UnitOptions {
    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Effective bound on a row-lock wait: the tighter of the lock timeout
    /// and the remaining deadline.
    pub fn lock_wait_limit(&self) -> Option<Duration> {
        match (self.lock_timeout, self.remaining()) {
            (Some(timeout), Some(remaining)) => Some(timeout.min(remaining)),
            (timeout, remaining) => timeout.or(remaining),
        }
    }
}

/// Pagination window for list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    /// Create a page.
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// Filter for listing transfers. Set fields are combined with OR, matching
/// transfers that touch either account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFilter {
    pub from_account_id: Option<AccountId>,
    pub to_account_id: Option<AccountId>,
}

impl TransferFilter {
    /// Match every transfer.
    pub fn all() -> Self {
        Self::default()
    }

    /// Transfers with `account_id` on either side.
    pub fn touching(account_id: AccountId) -> Self {
        Self {
            from_account_id: Some(account_id),
            to_account_id: Some(account_id),
        }
    }

    /// Check whether a transfer passes the filter.
    pub fn matches(&self, transfer: &Transfer) -> bool {
        match (self.from_account_id, self.to_account_id) {
            (None, None) => true,
            (from, to) => {
                from == Some(transfer.from_account_id) || to == Some(transfer.to_account_id)
            }
        }
    }
}

/// Shared handle to ledger storage.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Atomic unit type produced by this store.
    type Unit: LedgerUnit;

    /// Open a new atomic unit.
    async fn begin(&self, options: &UnitOptions) -> Result<Self::Unit>;

    /// Provision an account outside of any transfer.
    async fn create_account(&self, params: NewAccount) -> Result<Account>;

    /// Read a committed account.
    async fn get_account(&self, id: AccountId) -> Result<Account>;

    /// List accounts ordered by id.
    async fn list_accounts(&self, page: Page) -> Result<Vec<Account>>;

    /// Delete an account that no entry or transfer references.
    async fn delete_account(&self, id: AccountId) -> Result<()>;

    /// Read a committed entry.
    async fn get_entry(&self, id: EntryId) -> Result<Entry>;

    /// List entries of one account ordered by id.
    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>>;

    /// Read a committed transfer.
    async fn get_transfer(&self, id: TransferId) -> Result<Transfer>;

    /// List transfers ordered by id.
    async fn list_transfers(&self, filter: TransferFilter, page: Page) -> Result<Vec<Transfer>>;

    /// Sum of all committed balances held in `currency`.
    async fn total_balance(&self, currency: Currency) -> Result<i128>;
}

/// One open atomic unit.
#[async_trait]
pub trait LedgerUnit: Send {
    /// Read an account and hold its row exclusively until the unit ends.
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account>;

    /// Add `delta` to the stored balance in one storage-level step.
    async fn apply_balance_delta(&mut self, id: AccountId, delta: MinorUnits) -> Result<Account>;

    /// Record an entry against an account.
    async fn create_entry(&mut self, account_id: AccountId, amount: MinorUnits) -> Result<Entry>;

    /// Record a transfer between two accounts.
    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<Transfer>;

    /// Read an account as this unit sees it, without locking.
    async fn get_account(&mut self, id: AccountId) -> Result<Account>;

    /// Publish every change made through this unit.
    async fn commit(self) -> Result<()>;

    /// Discard every change made through this unit.
    async fn rollback(self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn transfer(from: i64, to: i64) -> Transfer {
        Transfer {
            id: TransferId::new(1),
            from_account_id: AccountId::new(from),
            to_account_id: AccountId::new(to),
            amount: 10,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_isolation_parse() {
        assert_eq!(
            IsolationLevel::parse("read_committed").unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            IsolationLevel::parse("Repeatable Read").unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            IsolationLevel::parse("SERIALIZABLE").unwrap(),
            IsolationLevel::Serializable
        );
        assert!(IsolationLevel::parse("chaos").is_err());
    }

    #[test]
    fn test_lock_wait_limit_takes_tighter_bound() {
        let options = UnitOptions {
            lock_timeout: Some(Duration::from_secs(5)),
            deadline: Some(Instant::now() + Duration::from_millis(200)),
            ..Default::default()
        };
        let limit = options.lock_wait_limit().unwrap();
        assert!(limit <= Duration::from_millis(200));

        let unbounded = UnitOptions::default();
        assert_eq!(unbounded.lock_wait_limit(), None);
    }

    #[test]
    fn test_transfer_filter() {
        assert!(TransferFilter::all().matches(&transfer(1, 2)));

        let touching = TransferFilter::touching(AccountId::new(2));
        assert!(touching.matches(&transfer(1, 2)));
        assert!(touching.matches(&transfer(2, 3)));
        assert!(!touching.matches(&transfer(1, 3)));

        let outgoing = TransferFilter {
            from_account_id: Some(AccountId::new(1)),
            to_account_id: None,
        };
        assert!(outgoing.matches(&transfer(1, 3)));
        assert!(!outgoing.matches(&transfer(3, 1)));
    }
}
