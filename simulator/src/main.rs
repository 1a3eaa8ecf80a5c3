//! SimpleBank Simulator
//!
//! Concurrent transfer load generator that audits the ledger afterwards.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use simplebank_common::{Currency, MinorUnits};
use simplebank_ledger::{
    LedgerConfig, LedgerStore, MemoryStore, PgStore, StoreBackend, TransferEngine,
};

mod accounts;
mod controller;
mod metrics;
mod scenario;

use controller::{AuditReport, SimulationController};
use metrics::MetricsSummary;
use scenario::{Scenario, ScenarioParams};

/// SimpleBank Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "SimpleBank concurrent transfer simulator")]
struct Args {
    /// Number of accounts to provision
    #[arg(short, long, default_value = "2")]
    accounts: usize,

    /// Scenario to run: same-direction, reversed-pairs, disjoint-pairs, random-mesh
    #[arg(short, long, default_value = "same-direction")]
    scenario: String,

    /// Number of concurrent transfers
    #[arg(short, long, default_value = "5")]
    transfers: usize,

    /// Amount per transfer in minor units (upper bound for random-mesh)
    #[arg(long, default_value = "10")]
    amount: MinorUnits,

    /// Opening balance of every account in minor units
    #[arg(long, default_value = "100")]
    initial_balance: MinorUnits,

    /// Account currency, or "random"
    #[arg(long, default_value = "USD")]
    currency: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Per-transfer timeout in milliseconds, overriding TRANSFER_TIMEOUT_MS
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Storage backend, overriding LEDGER_STORE_BACKEND
    #[arg(long)]
    backend: Option<String>,

    /// Fail this many commits up front (memory backend only)
    #[arg(long, default_value = "0")]
    inject_commit_failures: usize,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    report_json: bool,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    run_id: String,
    scenario: String,
    backend: StoreBackend,
    metrics: MetricsSummary,
    audit: AuditReport,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = LedgerConfig::from_env()?;
    if let Some(backend) = &args.backend {
        config.store.backend = StoreBackend::parse(backend)?;
    }
    config.validate()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let currency = match args.currency.as_str() {
        "random" => None,
        code => Some(Currency::parse(code)?),
    };

    info!("Starting SimpleBank Simulator");
    info!("Backend: {:?}", config.store.backend);

    let report = match config.store.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            let hook = store.clone();
            let failures = args.inject_commit_failures;
            simulate(store, &config, &args, currency, move || {
                if failures > 0 {
                    hook.fail_next_commits(failures);
                }
            })
            .await?
        }
        StoreBackend::Postgres => {
            if args.inject_commit_failures > 0 {
                warn!("--inject-commit-failures is ignored by the postgres backend");
            }
            let store = Arc::new(PgStore::connect(&config.store).await?);
            simulate(store, &config, &args, currency, || {}).await?
        }
    };

    info!("Simulation complete");
    info!("Total transfers: {}", report.metrics.total_transfers);
    info!("Successful: {}", report.metrics.successful_transfers);
    info!(
        "Failed: {} (canceled {}, storage {}, other {})",
        report.metrics.failed_transfers,
        report.metrics.canceled,
        report.metrics.storage_failures,
        report.metrics.other_failures
    );
    info!(
        "Latency: avg {}us, p50 {}us, p99 {}us",
        report.metrics.average_latency_us,
        report.metrics.p50_latency_us,
        report.metrics.p99_latency_us
    );
    info!("Throughput: {:.1} transfers/s", report.metrics.throughput_per_sec);

    if args.report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if !report.audit.passed() {
        error!(audit = ?report.audit, "Ledger audit failed");
        anyhow::bail!("ledger audit failed");
    }
    info!(
        "Audit passed: total {} before and after, {} transfers, {} entries",
        report.audit.balance_before,
        report.audit.transfers_recorded,
        report.audit.entries_recorded
    );

    Ok(())
}

/// Provision accounts, run the scenario and audit the ledger. `before_run`
/// is called once the accounts exist.
async fn simulate<S, F>(
    store: Arc<S>,
    config: &LedgerConfig,
    args: &Args,
    currency: Option<Currency>,
    before_run: F,
) -> anyhow::Result<SimulationReport>
where
    S: LedgerStore,
    F: FnOnce(),
{
    let engine = Arc::new(TransferEngine::with_config(store, &config.transfer));
    let timeout = args.timeout_ms.map(Duration::from_millis);
    let mut controller = SimulationController::new(engine, args.seed, timeout);

    let params = ScenarioParams {
        accounts: args.accounts,
        transfers: args.transfers,
        amount: args.amount,
    };
    let scenario = Scenario::load(&args.scenario, &params, controller.rng_mut())?;

    controller
        .initialize(args.accounts, args.initial_balance, currency)
        .await?;

    before_run();
    let elapsed = controller.run_scenario(&scenario).await?;
    let audit = controller.audit().await?;
    let metrics = controller.get_metrics().await.summary(elapsed);

    Ok(SimulationReport {
        run_id: controller.run_id().to_string(),
        scenario: scenario.name,
        backend: config.store.backend,
        metrics,
        audit,
    })
}
