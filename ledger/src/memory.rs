//! In-memory ledger store.
//!
//! Committed rows live in [`Tables`] behind a single `RwLock`. Each account has
//! an async row lock in a `DashMap`; a unit acquires it on the first exclusive
//! read or balance update of that account and keeps it until the unit ends,
//! the same way a relational store holds row locks until commit.
//!
//! Writes are staged inside the unit and published under one write lock on
//! commit, so a reader either sees a whole transfer or nothing of it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use simplebank_common::{
    AccountId, Currency, EntryId, LedgerError, MinorUnits, Result, TransferId,
};

use crate::account::{Account, NewAccount};
use crate::journal::Entry;
use crate::store::{LedgerStore, LedgerUnit, Page, TransferFilter, UnitOptions};
use crate::transfer::{check_transfer_shape, Transfer};

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

impl Tables {
    fn account(&self, id: AccountId) -> Result<Account> {
        self.accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::account_not_found(id))
    }

    fn is_referenced(&self, id: AccountId) -> bool {
        self.entries.values().any(|e| e.account_id == id)
            || self
                .transfers
                .values()
                .any(|t| t.from_account_id == id || t.to_account_id == id)
    }
}

#[derive(Default)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: DashMap<AccountId, Arc<Mutex<()>>>,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
    failing_commits: AtomicUsize,
}

impl Shared {
    fn next_id(seq: &AtomicI64) -> i64 {
        seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Wait for the row lock of `id`, bounded by `limit`.
    async fn lock_row(
        &self,
        id: AccountId,
        limit: Option<Duration>,
    ) -> Result<OwnedMutexGuard<()>> {
        let row = {
            let slot = self
                .row_locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(slot.value())
        };

        match limit {
            Some(limit) => tokio::time::timeout(limit, row.lock_owned())
                .await
                .map_err(|_| {
                    LedgerError::Canceled(format!(
                        "lock wait on account {} exceeded {:?}",
                        id, limit
                    ))
                }),
            None => Ok(row.lock_owned().await),
        }
    }

    fn take_commit_fault(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Process-local ledger store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with a storage failure.
    pub fn fail_next_commits(&self, count: usize) {
        self.shared.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Number of committed entries.
    pub fn entry_count(&self) -> usize {
        self.shared.tables.read().entries.len()
    }

    /// Number of committed transfers.
    pub fn transfer_count(&self) -> usize {
        self.shared.tables.read().transfers.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self, options: &UnitOptions) -> Result<MemoryUnit> {
        Ok(MemoryUnit {
            shared: Arc::clone(&self.shared),
            options: options.clone(),
            held: HashMap::new(),
            balances: BTreeMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
        })
    }

    async fn create_account(&self, params: NewAccount) -> Result<Account> {
        params.validate()?;

        let account = Account {
            id: AccountId::new(Shared::next_id(&self.shared.account_seq)),
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };

        self.shared
            .tables
            .write()
            .accounts
            .insert(account.id, account.clone());

        debug!(account_id = %account.id, currency = %account.currency, "Account created");
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        self.shared.tables.read().account(id)
    }

    async fn list_accounts(&self, page: Page) -> Result<Vec<Account>> {
        Ok(self
            .shared
            .tables
            .read()
            .accounts
            .values()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        // Wait out any unit that holds the row.
        let _row = self.shared.lock_row(id, None).await?;

        {
            let mut tables = self.shared.tables.write();
            if !tables.accounts.contains_key(&id) {
                return Err(LedgerError::account_not_found(id));
            }
            if tables.is_referenced(id) {
                return Err(LedgerError::ConstraintViolation(format!(
                    "account {} is referenced by ledger entries",
                    id
                )));
            }
            tables.accounts.remove(&id);
        }

        self.shared.row_locks.remove(&id);
        debug!(account_id = %id, "Account deleted");
        Ok(())
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        self.shared
            .tables
            .read()
            .entries
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound {
                entity: "entry",
                id: id.get(),
            })
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        Ok(self
            .shared
            .tables
            .read()
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.shared
            .tables
            .read()
            .transfers
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound {
                entity: "transfer",
                id: id.get(),
            })
    }

    async fn list_transfers(&self, filter: TransferFilter, page: Page) -> Result<Vec<Transfer>> {
        Ok(self
            .shared
            .tables
            .read()
            .transfers
            .values()
            .filter(|t| filter.matches(t))
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn total_balance(&self, currency: Currency) -> Result<i128> {
        Ok(self
            .shared
            .tables
            .read()
            .accounts
            .values()
            .filter(|a| a.currency == currency)
            .map(|a| a.balance as i128)
            .sum())
    }
}

/// Open atomic unit over a [`MemoryStore`].
pub struct MemoryUnit {
    shared: Arc<Shared>,
    options: UnitOptions,
    /// Row locks held until the unit ends.
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
    /// Staged balances, overriding committed ones.
    balances: BTreeMap<AccountId, MinorUnits>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
}

impl MemoryUnit {
    async fn hold(&mut self, id: AccountId) -> Result<()> {
        if self.held.contains_key(&id) {
            return Ok(());
        }
        let guard = self
            .shared
            .lock_row(id, self.options.lock_wait_limit())
            .await?;
        self.held.insert(id, guard);
        Ok(())
    }

    /// The account as this unit sees it.
    fn snapshot(&self, id: AccountId) -> Result<Account> {
        let mut account = self.shared.tables.read().account(id)?;
        if let Some(balance) = self.balances.get(&id) {
            account.balance = *balance;
        }
        Ok(account)
    }

    fn correlation(&self) -> &str {
        self.options.correlation_id.as_deref().unwrap_or("-")
    }
}

#[async_trait]
impl LedgerUnit for MemoryUnit {
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        self.hold(id).await?;
        self.snapshot(id)
    }

    async fn apply_balance_delta(&mut self, id: AccountId, delta: MinorUnits) -> Result<Account> {
        self.hold(id).await?;

        let mut account = self.snapshot(id)?;
        account.balance = account.balance.checked_add(delta).ok_or_else(|| {
            LedgerError::ConstraintViolation(format!(
                "balance of account {} out of range after adding {}",
                id, delta
            ))
        })?;
        self.balances.insert(id, account.balance);

        Ok(account)
    }

    async fn create_entry(&mut self, account_id: AccountId, amount: MinorUnits) -> Result<Entry> {
        self.snapshot(account_id)?;

        let entry = Entry {
            id: EntryId::new(Shared::next_id(&self.shared.entry_seq)),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<Transfer> {
        check_transfer_shape(from_account_id, to_account_id, amount)?;
        self.snapshot(from_account_id)?;
        self.snapshot(to_account_id)?;

        let transfer = Transfer {
            id: TransferId::new(Shared::next_id(&self.shared.transfer_seq)),
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        self.snapshot(id)
    }

    async fn commit(self) -> Result<()> {
        if self.shared.take_commit_fault() {
            warn!(correlation_id = %self.correlation(), "Injected commit failure");
            return Err(LedgerError::StorageFailure(
                "commit failed: injected fault".to_string(),
            ));
        }

        {
            let mut tables = self.shared.tables.write();

            let referenced = self
                .balances
                .keys()
                .copied()
                .chain(self.entries.iter().map(|e| e.account_id))
                .chain(
                    self.transfers
                        .iter()
                        .flat_map(|t| [t.from_account_id, t.to_account_id]),
                );
            for id in referenced {
                if !tables.accounts.contains_key(&id) {
                    return Err(LedgerError::account_not_found(id));
                }
            }

            for (id, balance) in &self.balances {
                if let Some(account) = tables.accounts.get_mut(id) {
                    account.balance = *balance;
                }
            }
            for entry in &self.entries {
                tables.entries.insert(entry.id, entry.clone());
            }
            for transfer in &self.transfers {
                tables.transfers.insert(transfer.id, transfer.clone());
            }
        }

        debug!(
            correlation_id = %self.correlation(),
            entries = self.entries.len(),
            transfers = self.transfers.len(),
            "Unit committed"
        );

        // Row locks are released only now, after the new state is visible.
        drop(self.held);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        debug!(
            correlation_id = %self.correlation(),
            staged_entries = self.entries.len(),
            "Unit rolled back"
        );
        Ok(())
    }
}
