//! Atomic unit execution.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, warn};

use simplebank_common::{LedgerError, Result};

use crate::store::{LedgerStore, LedgerUnit, UnitOptions};

/// Runs closures inside one atomic unit of a [`LedgerStore`].
pub struct AtomicExecutor<S: LedgerStore> {
    store: Arc<S>,
}

impl<S: LedgerStore> Clone for AtomicExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> AtomicExecutor<S> {
    /// Create an executor over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The store this executor opens units on.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `f` inside a fresh unit.
    ///
    /// The unit commits only when `f` succeeds. An error from `f`, an elapsed
    /// deadline, or a failed commit leaves no visible change. Errors from `f`
    /// are returned unchanged; a failed commit is a `StorageFailure` and an
    /// elapsed deadline is `Canceled`.
    pub async fn run_atomic<T, F>(&self, options: UnitOptions, f: F) -> Result<T>
    where
        T: Send,
        F: for<'u> FnOnce(&'u mut S::Unit) -> BoxFuture<'u, Result<T>> + Send,
    {
        let correlation_id = options.correlation_id.clone().unwrap_or_else(|| "-".into());

        if let Some(deadline) = options.deadline {
            if deadline <= Instant::now() {
                return Err(LedgerError::Canceled(
                    "deadline elapsed before the unit was opened".to_string(),
                ));
            }
        }

        let mut unit = self.store.begin(&options).await?;

        let outcome = match options.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, f(&mut unit)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(LedgerError::Canceled(
                    "deadline elapsed inside the unit".to_string(),
                )),
            },
            None => f(&mut unit).await,
        };

        match outcome {
            Ok(value) => {
                unit.commit().await.map_err(|e| match e {
                    LedgerError::StorageFailure(_) => e,
                    other => LedgerError::StorageFailure(other.to_string()),
                })?;
                debug!(correlation_id = %correlation_id, "Atomic unit committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = unit.rollback().await {
                    warn!(
                        correlation_id = %correlation_id,
                        error = %rollback_err,
                        "Rollback failed; the store discards the unit on release"
                    );
                }
                debug!(correlation_id = %correlation_id, error = %err, "Atomic unit rolled back");
                Err(err)
            }
        }
    }
}
