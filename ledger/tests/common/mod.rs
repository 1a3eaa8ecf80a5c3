//! Scenarios shared by the store-specific integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use simplebank_common::{Currency, MinorUnits};
use simplebank_ledger::{
    Account, LedgerStore, NewAccount, TransferEngine, TransferRequest, TransferResult,
};

/// Generous bound; a deadlocked engine would never finish.
pub const HANG_GUARD: Duration = Duration::from_secs(30);

pub async fn create_account<S: LedgerStore>(
    store: &S,
    owner: &str,
    balance: MinorUnits,
) -> Account {
    let account = store
        .create_account(NewAccount::new(owner, balance, Currency::Usd))
        .await
        .unwrap();
    assert_eq!(account.owner, owner);
    assert_eq!(account.balance, balance);
    assert!(account.id.get() > 0);
    account
}

/// Run `n` concurrent transfers of `amount` from `from` to `to` and check
/// every result the way a careful caller would.
pub async fn run_same_direction<S: LedgerStore>(
    engine: Arc<TransferEngine<S>>,
    from: &Account,
    to: &Account,
    n: usize,
    amount: MinorUnits,
) -> Vec<TransferResult> {
    let mut handles = Vec::with_capacity(n);
    for i in 0..n {
        let engine = Arc::clone(&engine);
        let request = TransferRequest::new(from.id, to.id, amount)
            .with_correlation_id(format!("tx {}", i + 1));
        handles.push(tokio::spawn(async move { engine.transfer(request).await }));
    }

    let results = tokio::time::timeout(HANG_GUARD, futures::future::join_all(handles))
        .await
        .expect("transfers did not finish");

    let store = engine.store();
    let mut seen_k = HashSet::new();
    let mut collected = Vec::with_capacity(n);

    for joined in results {
        let result = joined.unwrap().unwrap();

        let transfer = &result.transfer;
        assert_eq!(transfer.from_account_id, from.id);
        assert_eq!(transfer.to_account_id, to.id);
        assert_eq!(transfer.amount, amount);
        assert_eq!(store.get_transfer(transfer.id).await.unwrap(), *transfer);

        assert_eq!(result.from_entry.account_id, from.id);
        assert_eq!(result.from_entry.amount, -amount);
        assert_eq!(store.get_entry(result.from_entry.id).await.unwrap(), result.from_entry);

        assert_eq!(result.to_entry.account_id, to.id);
        assert_eq!(result.to_entry.amount, amount);
        assert_eq!(store.get_entry(result.to_entry.id).await.unwrap(), result.to_entry);

        assert_eq!(result.from_account.id, from.id);
        assert_eq!(result.from_account.owner, from.owner);
        assert_eq!(result.from_account.currency, from.currency);
        assert_eq!(result.to_account.id, to.id);
        assert_eq!(result.to_account.owner, to.owner);

        let diff_from = from.balance - result.from_account.balance;
        let diff_to = result.to_account.balance - to.balance;
        assert_eq!(diff_from, diff_to);
        assert!(diff_from > 0);
        assert_eq!(diff_from % amount, 0);

        let k = (diff_from / amount) as usize;
        assert!((1..=n).contains(&k), "k = {} out of range", k);
        assert!(seen_k.insert(k), "k = {} observed twice", k);

        collected.push(result);
    }

    let from_after = store.get_account(from.id).await.unwrap();
    let to_after = store.get_account(to.id).await.unwrap();
    assert_eq!(from_after.balance, from.balance - n as MinorUnits * amount);
    assert_eq!(to_after.balance, to.balance + n as MinorUnits * amount);

    collected
}

/// Run `n` (even) transfers alternating direction between two accounts.
pub async fn run_reversed_pairs<S: LedgerStore>(
    engine: Arc<TransferEngine<S>>,
    a: &Account,
    b: &Account,
    n: usize,
    amount: MinorUnits,
) {
    assert_eq!(n % 2, 0, "reversed scenario needs an even count");

    let mut handles = Vec::with_capacity(n);
    for i in 0..n {
        let (from, to) = if i % 2 == 1 { (b.id, a.id) } else { (a.id, b.id) };
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .transfer(TransferRequest::new(from, to, amount).with_correlation_id(format!("rev {}", i)))
                .await
        }));
    }

    let results = tokio::time::timeout(HANG_GUARD, futures::future::join_all(handles))
        .await
        .expect("reversed transfers deadlocked");
    for joined in results {
        joined.unwrap().unwrap();
    }

    let store = engine.store();
    assert_eq!(store.get_account(a.id).await.unwrap().balance, a.balance);
    assert_eq!(store.get_account(b.id).await.unwrap().balance, b.balance);
}
