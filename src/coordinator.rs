//! Transaction Coordinator
//!
//! Runs a unit of work inside one storage transaction with all-or-nothing
//! semantics:
//!
//! ```text
//! begin ──▶ unit(&mut tx) ──▶ Ok    ──▶ commit   ──▶ Ok(value) | CommitFailed
//!                         ├─▶ Err   ──▶ rollback ──▶ Err(e)    | RollbackFailed{e, rb}
//!                         ├─▶ panic ──▶ rollback ──▶ resume_unwind
//!                         └─▶ timed out ─▶ rollback ──▶ Timeout
//! ```
//!
//! The unit only ever sees the transaction-bound handle, never the store.
//! If the caller drops the future returned by [`TxCoordinator::run`], the
//! handle is dropped with it and the adapter discards the transaction.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use crate::error::{LedgerError, Result};
use crate::store::{LedgerStore, LedgerTx};

/// Outcome of the unit of work, before the transaction is finished
enum UnitOutcome<T> {
    Done(Result<T>),
    Panicked(Box<dyn std::any::Any + Send>),
    TimedOut(Duration),
}

/// Commit-or-rollback executor over a [`LedgerStore`]
pub struct TxCoordinator<S: LedgerStore> {
    store: Arc<S>,
    timeout: Option<Duration>,
}

impl<S: LedgerStore> Clone for TxCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            timeout: self.timeout,
        }
    }
}

impl<S: LedgerStore> TxCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            timeout: None,
        }
    }

    /// Abort units of work that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Execute `unit` in a new transaction.
    ///
    /// ```ignore
    /// let account = coordinator
    ///     .run(move |tx| Box::pin(async move { tx.add_account_balance(id, 10).await }))
    ///     .await?;
    /// ```
    pub async fn run<T, F>(&self, unit: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T>> + Send,
    {
        let mut tx = self.store.begin().await?;

        let outcome = {
            let work = AssertUnwindSafe(async { unit(&mut tx).await }).catch_unwind();
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(Ok(result)) => UnitOutcome::Done(result),
                    Ok(Err(panic)) => UnitOutcome::Panicked(panic),
                    Err(_) => UnitOutcome::TimedOut(limit),
                },
                None => match work.await {
                    Ok(result) => UnitOutcome::Done(result),
                    Err(panic) => UnitOutcome::Panicked(panic),
                },
            }
        };

        match outcome {
            UnitOutcome::Done(Ok(value)) => {
                tx.commit().await.map_err(|e| match e {
                    LedgerError::CommitFailed(_) => e,
                    other => LedgerError::CommitFailed(other.to_string()),
                })?;
                debug!(store = self.store.name(), "Transaction committed");
                Ok(value)
            }
            UnitOutcome::Done(Err(err)) => {
                warn!(store = self.store.name(), error = %err, "Unit of work failed, rolling back");
                match tx.rollback().await {
                    Ok(()) => Err(err),
                    Err(rb) => {
                        error!(error = %err, rollback_error = %rb, "Rollback failed");
                        Err(LedgerError::RollbackFailed {
                            source: Box::new(err),
                            rollback: rb.to_string(),
                        })
                    }
                }
            }
            UnitOutcome::TimedOut(limit) => {
                warn!(
                    store = self.store.name(),
                    timeout_ms = limit.as_millis() as u64,
                    "Unit of work timed out, rolling back"
                );
                let err = LedgerError::Timeout(limit);
                match tx.rollback().await {
                    Ok(()) => Err(err),
                    Err(rb) => {
                        error!(error = %err, rollback_error = %rb, "Rollback failed");
                        Err(LedgerError::RollbackFailed {
                            source: Box::new(err),
                            rollback: rb.to_string(),
                        })
                    }
                }
            }
            UnitOutcome::Panicked(panic) => {
                error!(store = self.store.name(), "Unit of work panicked, rolling back");
                if let Err(rb) = tx.rollback().await {
                    error!(rollback_error = %rb, "Failed to rollback transaction");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}
