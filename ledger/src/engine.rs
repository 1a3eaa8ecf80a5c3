//! Money-transfer engine.
//!
//! A transfer is one atomic unit that records the transfer, records the debit
//! and credit entries, and moves both balances. Balances are moved in account
//! id order (see [`crate::lock_order`]) so that transfers running in opposite
//! directions over the same pair of accounts queue up instead of deadlocking.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, instrument, warn, Span};

use simplebank_common::{AccountId, MinorUnits, Result};

use crate::account::Account;
use crate::config::TransferConfig;
use crate::executor::AtomicExecutor;
use crate::journal::Entry;
use crate::lock_order::{lock_order, LockOrder};
use crate::store::{LedgerStore, LedgerUnit, UnitOptions};
use crate::transfer::{check_transfer_shape, Transfer};

/// A request to move `amount` from one account to another.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: MinorUnits,
    /// Name attached to the logs of this call.
    pub correlation_id: Option<String>,
    /// Point after which the transfer is abandoned and rolled back.
    pub deadline: Option<Instant>,
}

impl TransferRequest {
    /// Create a request without deadline or correlation id.
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: MinorUnits) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            correlation_id: None,
            deadline: None,
        }
    }

    /// Attach a correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Give up at `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Give up after `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Reject degenerate requests.
    pub fn validate(&self) -> Result<()> {
        check_transfer_shape(self.from_account_id, self.to_account_id, self.amount)
    }
}

/// Everything a successful transfer produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    /// Source account after the debit.
    pub from_account: Account,
    /// Destination account after the credit.
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

/// Take exclusive access to an account, then move its balance by `delta`.
async fn move_funds<U: LedgerUnit>(
    unit: &mut U,
    account_id: AccountId,
    delta: MinorUnits,
) -> Result<Account> {
    unit.get_account_for_update(account_id).await?;
    unit.apply_balance_delta(account_id, delta).await
}

/// The transfer orchestrator.
pub struct TransferEngine<S: LedgerStore> {
    executor: AtomicExecutor<S>,
    defaults: UnitOptions,
    default_timeout: Option<Duration>,
}

impl<S: LedgerStore> TransferEngine<S> {
    /// Create an engine over `store` with default unit options and no
    /// default deadline.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            executor: AtomicExecutor::new(store),
            defaults: UnitOptions::default(),
            default_timeout: None,
        }
    }

    /// Create an engine configured from [`TransferConfig`].
    pub fn with_config(store: Arc<S>, config: &TransferConfig) -> Self {
        Self {
            executor: AtomicExecutor::new(store),
            defaults: config.unit_options(),
            default_timeout: config.default_timeout,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        self.executor.store()
    }

    /// Move `request.amount` from the source to the destination account.
    ///
    /// Invalid requests are rejected before any unit is opened. The engine
    /// never retries: a retried call books a new transfer.
    #[instrument(
        name = "transfer",
        skip(self, request),
        fields(
            correlation_id = request.correlation_id.as_deref().unwrap_or("-"),
            from = %request.from_account_id,
            to = %request.to_account_id,
            amount = request.amount,
            transfer_id = tracing::field::Empty,
        )
    )]
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferResult> {
        request.validate()?;

        let mut options = self.defaults.clone();
        options.correlation_id = request.correlation_id.clone();
        options.deadline = request
            .deadline
            .or_else(|| self.default_timeout.map(|timeout| Instant::now() + timeout));

        let TransferRequest {
            from_account_id: from,
            to_account_id: to,
            amount,
            ..
        } = request;

        let outcome = self
            .executor
            .run_atomic(options, move |unit| {
                Box::pin(async move {
                    let transfer = unit.create_transfer(from, to, amount).await?;
                    let from_entry = unit.create_entry(from, -amount).await?;
                    let to_entry = unit.create_entry(to, amount).await?;

                    let (from_account, to_account) = match lock_order(from, to) {
                        LockOrder::SourceFirst => {
                            let from_account = move_funds(unit, from, -amount).await?;
                            let to_account = move_funds(unit, to, amount).await?;
                            (from_account, to_account)
                        }
                        LockOrder::DestinationFirst => {
                            let to_account = move_funds(unit, to, amount).await?;
                            let from_account = move_funds(unit, from, -amount).await?;
                            (from_account, to_account)
                        }
                    };

                    Ok(TransferResult {
                        transfer,
                        from_account,
                        to_account,
                        from_entry,
                        to_entry,
                    })
                })
            })
            .await;

        match &outcome {
            Ok(result) => {
                Span::current().record("transfer_id", result.transfer.id.get());
                info!(
                    from_balance = result.from_account.balance,
                    to_balance = result.to_account.balance,
                    "Transfer committed"
                );
            }
            Err(err) => {
                warn!(error = %err, code = err.error_code(), "Transfer failed");
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplebank_common::{Currency, LedgerError};

    use crate::account::NewAccount;
    use crate::memory::MemoryStore;
    use crate::store::{Page, TransferFilter};

    async fn engine_with(balances: &[MinorUnits]) -> (TransferEngine<MemoryStore>, Vec<Account>) {
        let store = Arc::new(MemoryStore::new());
        let mut accounts = Vec::new();
        for (i, balance) in balances.iter().enumerate() {
            accounts.push(
                store
                    .create_account(NewAccount::new(format!("holder{}", i), *balance, Currency::Usd))
                    .await
                    .unwrap(),
            );
        }
        (TransferEngine::new(store), accounts)
    }

    #[tokio::test]
    async fn test_single_transfer() {
        let (engine, accounts) = engine_with(&[100, 50]).await;
        let (a, b) = (&accounts[0], &accounts[1]);

        let result = engine
            .transfer(TransferRequest::new(a.id, b.id, 30).with_correlation_id("tx 1"))
            .await
            .unwrap();

        assert_eq!(result.transfer.from_account_id, a.id);
        assert_eq!(result.transfer.to_account_id, b.id);
        assert_eq!(result.transfer.amount, 30);
        assert_eq!(result.from_entry.account_id, a.id);
        assert_eq!(result.from_entry.amount, -30);
        assert_eq!(result.to_entry.account_id, b.id);
        assert_eq!(result.to_entry.amount, 30);
        assert_eq!(result.from_account.balance, 70);
        assert_eq!(result.to_account.balance, 80);
        assert_eq!(result.from_account.owner, a.owner);
        assert_eq!(result.to_account.currency, b.currency);

        let store = engine.store();
        assert_eq!(store.get_transfer(result.transfer.id).await.unwrap(), result.transfer);
        assert_eq!(store.get_entry(result.from_entry.id).await.unwrap(), result.from_entry);
        assert_eq!(store.get_entry(result.to_entry.id).await.unwrap(), result.to_entry);
        assert_eq!(store.get_account(a.id).await.unwrap().balance, 70);
        assert_eq!(store.get_account(b.id).await.unwrap().balance, 80);
    }

    #[tokio::test]
    async fn test_destination_with_lower_id() {
        let (engine, accounts) = engine_with(&[10, 200]).await;
        let (low, high) = (&accounts[0], &accounts[1]);

        let result = engine
            .transfer(TransferRequest::new(high.id, low.id, 45))
            .await
            .unwrap();

        assert_eq!(result.from_account.id, high.id);
        assert_eq!(result.from_account.balance, 155);
        assert_eq!(result.to_account.id, low.id);
        assert_eq!(result.to_account.balance, 55);
    }

    #[tokio::test]
    async fn test_degenerate_requests_rejected() {
        let (engine, accounts) = engine_with(&[100, 50]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);

        for request in [
            TransferRequest::new(a, b, 0),
            TransferRequest::new(a, b, -10),
            TransferRequest::new(a, a, 10),
        ] {
            let err = engine.transfer(request).await.unwrap_err();
            assert!(matches!(err, LedgerError::ConstraintViolation(_)));
        }

        assert_eq!(engine.store().transfer_count(), 0);
        assert_eq!(engine.store().entry_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_account_leaves_no_trace() {
        let (engine, accounts) = engine_with(&[100]).await;
        let a = accounts[0].id;

        let err = engine
            .transfer(TransferRequest::new(a, AccountId::new(77), 10))
            .await
            .unwrap_err();

        assert_eq!(err, LedgerError::account_not_found(AccountId::new(77)));
        assert_eq!(engine.store().get_account(a).await.unwrap().balance, 100);
        assert!(engine
            .store()
            .list_transfers(TransferFilter::touching(a), Page::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back_transfer() {
        let (engine, accounts) = engine_with(&[100, 50]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);
        engine.store().fail_next_commits(1);

        let err = engine
            .transfer(TransferRequest::new(a, b, 10))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, LedgerError::StorageFailure(_)));
        assert_eq!(engine.store().transfer_count(), 0);
        assert_eq!(engine.store().entry_count(), 0);
        assert_eq!(engine.store().get_account(a).await.unwrap().balance, 100);

        // The caller's retry books a fresh transfer.
        let result = engine.transfer(TransferRequest::new(a, b, 10)).await.unwrap();
        assert_eq!(result.from_account.balance, 90);
        assert_eq!(engine.store().transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_overdraft_is_allowed() {
        let (engine, accounts) = engine_with(&[5, 0]).await;

        let result = engine
            .transfer(TransferRequest::new(accounts[0].id, accounts[1].id, 20))
            .await
            .unwrap();
        assert_eq!(result.from_account.balance, -15);
        assert_eq!(result.to_account.balance, 20);
    }

    #[tokio::test]
    async fn test_result_serializes() {
        let (engine, accounts) = engine_with(&[100, 50]).await;
        let result = engine
            .transfer(TransferRequest::new(accounts[0].id, accounts[1].id, 1))
            .await
            .unwrap();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["transfer"]["amount"], 1);
        assert_eq!(json["from_entry"]["amount"], -1);
        assert_eq!(json["to_account"]["currency"], "USD");
    }
}
