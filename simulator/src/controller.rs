//! Simulation controller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use simplebank_common::{Currency, MinorUnits, TransferId};
use simplebank_ledger::journal::is_balanced;
use simplebank_ledger::{
    Account, Entry, LedgerStore, Page, Transfer, TransferEngine, TransferFilter, TransferRequest,
};

use crate::accounts::{provision, random_currency};
use crate::metrics::SimulationMetrics;
use crate::scenario::Scenario;

const AUDIT_PAGE: u32 = 500;

/// Result of the post-run ledger audit.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    /// Sum of balances in the run currency before the run.
    pub balance_before: i128,
    /// Sum of balances in the run currency after the run.
    pub balance_after: i128,
    /// Committed transfers touching the simulated accounts.
    pub transfers_recorded: usize,
    /// Entries recorded against the simulated accounts.
    pub entries_recorded: usize,
    /// Accounts whose balance, entries and transfers disagree.
    pub mismatched_accounts: Vec<i64>,
    /// Total balance unchanged.
    pub conserved: bool,
    /// Two entries per transfer and a zero entry sum.
    pub paired: bool,
}

impl AuditReport {
    /// Whether every ledger invariant held.
    pub fn passed(&self) -> bool {
        self.conserved && self.paired && self.mismatched_accounts.is_empty()
    }
}

/// Drives a scenario against a [`TransferEngine`] and audits the outcome.
pub struct SimulationController<S: LedgerStore> {
    engine: Arc<TransferEngine<S>>,
    /// Random number generator.
    rng: StdRng,
    /// Tag prefixed to correlation ids.
    run_id: String,
    /// Per-transfer timeout overriding the engine default.
    timeout: Option<Duration>,
    accounts: Vec<Account>,
    currency: Currency,
    balance_before: i128,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl<S: LedgerStore> SimulationController<S> {
    /// Create a new simulation controller.
    pub fn new(engine: Arc<TransferEngine<S>>, seed: Option<u64>, timeout: Option<Duration>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let run_id = Uuid::new_v4().simple().to_string()[..8].to_string();

        Self {
            engine,
            rng,
            run_id,
            timeout,
            accounts: Vec::new(),
            currency: Currency::Usd,
            balance_before: 0,
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        }
    }

    /// Tag of this run.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Provisioned accounts, in creation order.
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Random number generator, for building scenarios.
    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Provision the simulated accounts. A missing currency is picked at
    /// random.
    pub async fn initialize(
        &mut self,
        count: usize,
        initial_balance: MinorUnits,
        currency: Option<Currency>,
    ) -> anyhow::Result<()> {
        self.currency = currency.unwrap_or_else(|| random_currency(&mut self.rng));
        info!(
            run_id = %self.run_id,
            "Initializing simulation with {} {} accounts",
            count,
            self.currency
        );

        let store = self.engine.store();
        self.accounts = provision(
            &**store,
            count,
            initial_balance,
            self.currency,
            &mut self.rng,
        )
        .await?;
        self.balance_before = store.total_balance(self.currency).await?;

        Ok(())
    }

    /// Launch every transfer of `scenario` at once and wait for all of them.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<Duration> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        let started = Instant::now();
        let mut handles = Vec::with_capacity(scenario.transfers.len());

        for (i, planned) in scenario.transfers.iter().enumerate() {
            let from = self
                .accounts
                .get(planned.from)
                .with_context(|| format!("scenario references account #{}", planned.from))?;
            let to = self
                .accounts
                .get(planned.to)
                .with_context(|| format!("scenario references account #{}", planned.to))?;

            let mut request = TransferRequest::new(from.id, to.id, planned.amount)
                .with_correlation_id(format!("{} tx {}", self.run_id, i + 1));
            if let Some(timeout) = self.timeout {
                request = request.with_timeout(timeout);
            }

            let engine = Arc::clone(&self.engine);
            let metrics = Arc::clone(&self.metrics);
            handles.push(tokio::spawn(async move {
                let begun = Instant::now();
                match engine.transfer(request).await {
                    Ok(_) => metrics.write().await.record_success(begun.elapsed()),
                    Err(err) => metrics.write().await.record_failure(&err),
                }
            }));
        }

        for joined in join_all(handles).await {
            joined.context("transfer task panicked")?;
        }

        let elapsed = started.elapsed();
        info!("Scenario {} finished in {:?}", scenario.name, elapsed);
        Ok(elapsed)
    }

    /// Check conservation and entry pairing against committed state.
    pub async fn audit(&self) -> anyhow::Result<AuditReport> {
        let store = self.engine.store();
        let balance_after = store.total_balance(self.currency).await?;

        let mut transfers: BTreeMap<TransferId, Transfer> = BTreeMap::new();
        let mut all_entries = Vec::new();
        let mut mismatched_accounts = Vec::new();

        for initial in &self.accounts {
            let account = store.get_account(initial.id).await?;
            let touching = fetch_transfers(&**store, TransferFilter::touching(account.id)).await?;
            let entries = fetch_entries(&**store, &account).await?;

            let entry_sum: i128 = entries.iter().map(|e| e.amount as i128).sum();
            let moved = account.balance as i128 - initial.balance as i128;
            if entries.len() != touching.len() || entry_sum != moved {
                warn!(
                    account_id = %account.id,
                    entries = entries.len(),
                    transfers = touching.len(),
                    entry_sum,
                    moved,
                    "Account does not reconcile"
                );
                mismatched_accounts.push(account.id.get());
            }

            for transfer in touching {
                transfers.insert(transfer.id, transfer);
            }
            all_entries.extend(entries);
        }

        let committed = self.metrics.read().await.successful_transfers as usize;
        let paired = all_entries.len() == 2 * transfers.len()
            && transfers.len() == committed
            && is_balanced(&all_entries);

        Ok(AuditReport {
            balance_before: self.balance_before,
            balance_after,
            transfers_recorded: transfers.len(),
            entries_recorded: all_entries.len(),
            mismatched_accounts,
            conserved: balance_after == self.balance_before,
            paired,
        })
    }

    /// Get simulation metrics.
    pub async fn get_metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }
}

async fn fetch_transfers<S: LedgerStore>(
    store: &S,
    filter: TransferFilter,
) -> anyhow::Result<Vec<Transfer>> {
    let mut all = Vec::new();
    loop {
        let page = store
            .list_transfers(filter, Page::new(AUDIT_PAGE, all.len() as u32))
            .await?;
        let done = page.len() < AUDIT_PAGE as usize;
        all.extend(page);
        if done {
            return Ok(all);
        }
    }
}

async fn fetch_entries<S: LedgerStore>(store: &S, account: &Account) -> anyhow::Result<Vec<Entry>> {
    let mut all = Vec::new();
    loop {
        let page = store
            .list_entries(account.id, Page::new(AUDIT_PAGE, all.len() as u32))
            .await?;
        let done = page.len() < AUDIT_PAGE as usize;
        all.extend(page);
        if done {
            return Ok(all);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplebank_ledger::MemoryStore;

    use crate::scenario::ScenarioParams;

    async fn controller(accounts: usize, seed: u64) -> SimulationController<MemoryStore> {
        let engine = Arc::new(TransferEngine::new(Arc::new(MemoryStore::new())));
        let mut controller = SimulationController::new(engine, Some(seed), None);
        controller
            .initialize(accounts, 1_000, Some(Currency::Usd))
            .await
            .unwrap();
        controller
    }

    async fn run(controller: &mut SimulationController<MemoryStore>, name: &str, transfers: usize) {
        let params = ScenarioParams {
            accounts: controller.accounts().len(),
            transfers,
            amount: 10,
        };
        let scenario = Scenario::load(name, &params, controller.rng_mut()).unwrap();
        controller.run_scenario(&scenario).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_direction_audit() {
        let mut controller = controller(2, 1).await;
        run(&mut controller, "same-direction", 20).await;

        let metrics = controller.get_metrics().await;
        assert_eq!(metrics.successful_transfers, 20);

        let report = controller.audit().await.unwrap();
        assert!(report.passed(), "{:?}", report);
        assert_eq!(report.transfers_recorded, 20);
        assert_eq!(report.entries_recorded, 40);
        assert_eq!(report.balance_before, 2_000);

        let store = controller.engine.store();
        assert_eq!(store.get_account(controller.accounts()[0].id).await.unwrap().balance, 800);
        assert_eq!(store.get_account(controller.accounts()[1].id).await.unwrap().balance, 1_200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_scenario_passes_audit() {
        for name in Scenario::NAMES {
            let mut controller = controller(6, 11).await;
            run(&mut controller, name, 60).await;

            let report = controller.audit().await.unwrap();
            assert!(report.passed(), "{}: {:?}", name, report);
            assert_eq!(report.transfers_recorded, 60, "{}", name);
        }
    }

    #[tokio::test]
    async fn test_commit_failures_are_counted_and_leave_no_trace() {
        let mut controller = controller(2, 5).await;
        controller.engine.store().fail_next_commits(3);
        run(&mut controller, "reversed-pairs", 10).await;

        let metrics = controller.get_metrics().await;
        assert_eq!(metrics.storage_failures, 3);
        assert_eq!(metrics.successful_transfers, 7);

        let report = controller.audit().await.unwrap();
        assert!(report.passed(), "{:?}", report);
        assert_eq!(report.transfers_recorded, 7);
    }
}
