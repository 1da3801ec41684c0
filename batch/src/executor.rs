//! Bounded parallel executor.
//!
//! Every operation of a batch is turned into one future and all of them are
//! joined together; a shared semaphore is the worker window. Tokio's
//! semaphore hands out permits in FIFO order and `join_all` polls its
//! futures in input order, so operations start in input order and a freed
//! permit always goes to the next unscheduled operation.
//!
//! The executor adds no retries of its own. Retrying happens inside each
//! call (see the gateway crate), so attempt counts never multiply.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};

use fanout_types::{ExecutorConfig, Operation, Outcome, Rejection};
use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::BatchError;

const _: () = assert!(ExecutorConfig::MAX_CONCURRENT_REQUESTS <= Semaphore::MAX_PERMITS);

/// Runs keyed operations with a concurrency ceiling and a batch-size ceiling.
///
/// One executor can be shared by several concurrent batches; the
/// concurrency ceiling then holds across all of them.
#[derive(Debug)]
pub struct BatchExecutor {
    config: ExecutorConfig,
    permits: Semaphore,
    in_flight: AtomicUsize,
}

impl BatchExecutor {
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            permits: Semaphore::new(config.max_concurrent_requests()),
            in_flight: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn config(&self) -> ExecutorConfig {
        self.config
    }

    /// Number of operations currently executing.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Execute every operation and return one outcome per operation, in input
    /// order.
    ///
    /// Fails before invoking any call factory if the batch is larger than
    /// `max_batch_size` or contains the same key twice. Otherwise every
    /// operation settles independently: a failure or panic in one never
    /// cancels the others.
    pub async fn execute_parallel<K, F, Fut, V, E>(
        &self,
        operations: Vec<Operation<K, F>>,
        label: &str,
    ) -> Result<Vec<Outcome<K, V>>, BatchError>
    where
        K: Eq + Hash + fmt::Debug,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Into<Rejection>,
    {
        self.validate(&operations, label)?;

        if operations.is_empty() {
            tracing::debug!(label, "Empty batch, nothing to execute");
            return Ok(Vec::new());
        }

        let total = operations.len();
        tracing::debug!(
            label,
            total,
            max_concurrent = self.config.max_concurrent_requests(),
            "Executing batch"
        );

        let outcomes = join_all(
            operations
                .into_iter()
                .map(|operation| self.run_one(operation, label)),
        )
        .await;

        let rejected = outcomes.iter().filter(|o| o.is_rejected()).count();
        tracing::debug!(
            label,
            total,
            fulfilled = total - rejected,
            rejected,
            "Batch settled"
        );
        Ok(outcomes)
    }

    fn validate<K, F>(&self, operations: &[Operation<K, F>], label: &str) -> Result<(), BatchError>
    where
        K: Eq + Hash + fmt::Debug,
    {
        let max = self.config.max_batch_size();
        if operations.len() > max {
            tracing::warn!(label, size = operations.len(), max, "Batch rejected: too large");
            return Err(BatchError::BatchTooLarge {
                label: label.to_string(),
                size: operations.len(),
                max,
            });
        }

        let mut seen = HashSet::with_capacity(operations.len());
        for operation in operations {
            if !seen.insert(&operation.key) {
                let key = format!("{:?}", operation.key);
                tracing::warn!(label, key = %key, "Batch rejected: duplicate key");
                return Err(BatchError::DuplicateKey {
                    label: label.to_string(),
                    key,
                });
            }
        }
        Ok(())
    }

    async fn run_one<K, F, Fut, V, E>(&self, operation: Operation<K, F>, label: &str) -> Outcome<K, V>
    where
        K: fmt::Debug,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Into<Rejection>,
    {
        let Operation { key, call } = operation;

        // The semaphore is never closed, so this only fails if that changes.
        let Ok(_permit) = self.permits.acquire().await else {
            return Outcome::Rejected {
                key,
                reason: Rejection::Other("executor is shut down".to_string()),
            };
        };
        let _guard = InFlight::enter(&self.in_flight);

        // The factory runs inside the guarded future so a panic while
        // building the call is caught too.
        let result = AssertUnwindSafe(async move { call().await })
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(value)) => Outcome::Fulfilled { key, value },
            Ok(Err(err)) => Outcome::Rejected {
                key,
                reason: err.into(),
            },
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(label, key = ?key, panic = %message, "Operation panicked");
                Outcome::Rejected {
                    key,
                    reason: Rejection::Other(format!("operation panicked: {message}")),
                }
            }
        }
    }
}

/// In-flight gauge increment that is undone on drop, panics included.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
