//! Simulation metrics.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use simplebank_common::LedgerError;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total transfers attempted.
    pub total_transfers: u64,
    /// Committed transfers.
    pub successful_transfers: u64,
    /// Transfers abandoned at their deadline or lock timeout.
    pub canceled: u64,
    /// Transfers lost to a storage or commit failure.
    pub storage_failures: u64,
    /// Any other failure.
    pub other_failures: u64,
    /// Latency samples of committed transfers (us).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

/// Serializable snapshot of [`SimulationMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_transfers: u64,
    pub successful_transfers: u64,
    pub failed_transfers: u64,
    pub canceled: u64,
    pub storage_failures: u64,
    pub other_failures: u64,
    pub success_rate: f64,
    pub average_latency_us: u64,
    pub p50_latency_us: u64,
    pub p99_latency_us: u64,
    pub throughput_per_sec: f64,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_transfers: 0,
            successful_transfers: 0,
            canceled: 0,
            storage_failures: 0,
            other_failures: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a committed transfer.
    pub fn record_success(&mut self, latency: Duration) {
        self.total_transfers += 1;
        self.successful_transfers += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples
            .push_back(u64::try_from(latency.as_micros()).unwrap_or(u64::MAX));
    }

    /// Record a failed transfer by error kind.
    pub fn record_failure(&mut self, error: &LedgerError) {
        self.total_transfers += 1;
        match error {
            LedgerError::Canceled(_) => self.canceled += 1,
            LedgerError::StorageFailure(_) => self.storage_failures += 1,
            _ => self.other_failures += 1,
        }
    }

    /// All failures.
    pub fn failed_transfers(&self) -> u64 {
        self.canceled + self.storage_failures + self.other_failures
    }

    /// Average latency in us.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_transfers == 0 {
            return 0.0;
        }

        self.successful_transfers as f64 / self.total_transfers as f64
    }

    /// Attempted transfers per second over `elapsed`.
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }

        self.total_transfers as f64 / secs
    }

    /// Snapshot for reporting.
    pub fn summary(&self, elapsed: Duration) -> MetricsSummary {
        MetricsSummary {
            total_transfers: self.total_transfers,
            successful_transfers: self.successful_transfers,
            failed_transfers: self.failed_transfers(),
            canceled: self.canceled,
            storage_failures: self.storage_failures,
            other_failures: self.other_failures,
            success_rate: self.success_rate(),
            average_latency_us: self.average_latency_us(),
            p50_latency_us: self.p50_latency_us(),
            p99_latency_us: self.p99_latency_us(),
            throughput_per_sec: self.throughput(elapsed),
        }
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplebank_common::AccountId;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_success(Duration::from_micros(100));
        metrics.record_success(Duration::from_micros(200));
        metrics.record_success(Duration::from_micros(150));
        metrics.record_failure(&LedgerError::Canceled("deadline".into()));

        assert_eq!(metrics.total_transfers, 4);
        assert_eq!(metrics.successful_transfers, 3);
        assert_eq!(metrics.failed_transfers(), 1);
        assert_eq!(metrics.average_latency_us(), 150);
        assert_eq!(metrics.p50_latency_us(), 150);
        assert_eq!(metrics.p99_latency_us(), 200);
        assert_eq!(metrics.success_rate(), 0.75);
    }

    #[test]
    fn test_failures_by_kind() {
        let mut metrics = SimulationMetrics::new();
        metrics.record_failure(&LedgerError::Canceled("lock timeout".into()));
        metrics.record_failure(&LedgerError::StorageFailure("commit".into()));
        metrics.record_failure(&LedgerError::StorageFailure("commit".into()));
        metrics.record_failure(&LedgerError::account_not_found(AccountId::new(9)));

        let summary = metrics.summary(Duration::from_secs(2));
        assert_eq!(summary.canceled, 1);
        assert_eq!(summary.storage_failures, 2);
        assert_eq!(summary.other_failures, 1);
        assert_eq!(summary.failed_transfers, 4);
        assert_eq!(summary.throughput_per_sec, 2.0);
        assert_eq!(summary.p99_latency_us, 0);
    }
}
