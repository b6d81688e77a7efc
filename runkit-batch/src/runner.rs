//! Bounded-concurrency batch scheduler.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use runkit_cache::{CacheLookup, CacheResult, TtlCache};
use runkit_primitives::{Error as InputError, RunId, ensure_not_empty};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::operation::{BatchOperation, BatchOptions, BatchReport, BatchResult, MAX_OPERATIONS};
use crate::OperationExecutor;

/// Errors rejecting a whole batch call.
///
/// Individual operation failures never surface here; they are reported in
/// the corresponding [`BatchResult`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// An option or operation failed validation; nothing was executed.
    #[error(transparent)]
    InvalidInput(#[from] InputError),
    /// Two operations share an identifier.
    #[error("duplicate operation id `{id}`")]
    DuplicateId {
        /// Repeated identifier.
        id: String,
    },
    /// Caching was requested but the runner has no cache attached.
    #[error("result caching requested but no cache is configured")]
    CacheUnavailable,
}

/// Result alias for batch runs.
pub type BatchRunResult<T> = Result<T, BatchError>;

/// Runs operations through an executor with bounded concurrency.
#[derive(Clone)]
pub struct BatchRunner {
    executor: Arc<dyn OperationExecutor>,
    cache: Option<Arc<TtlCache>>,
}

impl fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRunner")
            .field("executor", &"dyn OperationExecutor")
            .field("cache_configured", &self.cache.is_some())
            .finish()
    }
}

struct Settled {
    index: usize,
    operation: BatchOperation,
    result: BatchResult,
}

impl BatchRunner {
    /// Creates a runner without a cache.
    #[must_use]
    pub fn new(executor: Arc<dyn OperationExecutor>) -> Self {
        Self {
            executor,
            cache: None,
        }
    }

    /// Attaches the cache consulted when [`BatchOptions::use_cache`] is set.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<TtlCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Runs `operations` and returns one result per operation in input order.
    ///
    /// At most `options.concurrency` operations are in flight at once. Each is
    /// raced against `options.timeout_ms`; a timed-out operation is dropped and
    /// reported as failed. With `continue_on_error` unset, the first failure
    /// stops new operations from starting while in-flight ones finish.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when the call itself is malformed. Operation
    /// failures, executor panics and cache faults are reported per item
    /// instead.
    pub async fn run(
        &self,
        operations: Vec<BatchOperation>,
        options: BatchOptions,
    ) -> BatchRunResult<BatchReport> {
        options.validate()?;
        validate_operations(&operations)?;
        if options.use_cache && self.cache.is_none() {
            return Err(BatchError::CacheUnavailable);
        }

        let run_id = RunId::random();
        let span = info_span!("batch_run", %run_id, total = operations.len());
        self.run_validated(operations, options).instrument(span).await
    }

    async fn run_validated(
        &self,
        operations: Vec<BatchOperation>,
        options: BatchOptions,
    ) -> BatchRunResult<BatchReport> {
        let total = operations.len();
        let concurrency = options.concurrency as usize;
        let cache = options.use_cache.then_some(self.cache.as_ref()).flatten();

        let mut slots: Vec<Option<BatchResult>> = vec![None; total];
        let mut queue: VecDeque<(usize, BatchOperation)> =
            operations.into_iter().enumerate().collect();
        let mut in_flight = FuturesUnordered::new();
        let mut stopped = false;

        info!(concurrency, timeout_ms = options.timeout_ms, "batch started");

        loop {
            while !stopped && in_flight.len() < concurrency {
                let Some((index, operation)) = queue.pop_front() else {
                    break;
                };

                let served = cache.and_then(|cache| {
                    let lookup = cache.get(&operation.cache_key(), &operation.cache_namespace());
                    served_from_cache(&operation.id, lookup)
                });
                if let Some(result) = served {
                    if !result.success && !options.continue_on_error {
                        stopped = true;
                        halt(&operation.id, queue.len());
                    }
                    slots[index] = Some(result);
                    continue;
                }

                in_flight.push(execute_one(
                    Arc::clone(&self.executor),
                    index,
                    operation,
                    options.timeout_ms,
                ));
            }

            let Some(settled) = in_flight.next().await else {
                break;
            };

            if settled.result.success {
                if let (Some(cache), Some(value)) = (cache, settled.result.result.as_ref()) {
                    let stored = cache.put(
                        &settled.operation.cache_key(),
                        value.clone(),
                        options.cache_ttl_seconds,
                        &settled.operation.cache_namespace(),
                    );
                    // The result stands even when it cannot be cached.
                    if let Err(err) = stored {
                        warn!(id = %settled.operation.id, %err, "failed to cache operation result");
                    }
                }
            } else if !options.continue_on_error && !stopped {
                stopped = true;
                halt(&settled.operation.id, queue.len());
            }

            slots[settled.index] = Some(settled.result);
        }

        for (index, operation) in queue {
            slots[index] = Some(BatchResult::not_started(operation.id));
        }

        let results: Vec<BatchResult> = slots.into_iter().flatten().collect();
        let report = BatchReport::from_results(results);
        info!(
            successful = report.successful,
            failed = report.failed,
            skipped = report.skipped,
            "batch finished"
        );
        Ok(report)
    }
}

fn halt(id: &str, pending: usize) {
    warn!(id, pending, "operation failed; no further operations will start");
}

/// Settles an operation from its cache lookup. Returns `None` on a miss so the
/// operation executes; a cache fault fails this operation only.
fn served_from_cache(id: &str, lookup: CacheResult<CacheLookup>) -> Option<BatchResult> {
    match lookup {
        Ok(CacheLookup {
            value: Some(value), ..
        }) => {
            debug!(id, "served from cache");
            Some(BatchResult::from_cache(id.to_owned(), value))
        }
        Ok(_) => None,
        Err(err) => {
            warn!(id, %err, "cache lookup failed");
            Some(BatchResult::failed(
                id.to_owned(),
                format!("cache lookup failed: {err}"),
                0,
            ))
        }
    }
}

async fn execute_one(
    executor: Arc<dyn OperationExecutor>,
    index: usize,
    operation: BatchOperation,
    timeout_ms: u64,
) -> Settled {
    let started = Instant::now();
    // A panicking executor fails its own operation, not the batch.
    let work = AssertUnwindSafe(executor.execute(&operation)).catch_unwind();
    let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), work).await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let id = operation.id.clone();
    let result = match outcome {
        Ok(Ok(Ok(value))) => {
            debug!(%id, duration_ms, "operation succeeded");
            BatchResult::succeeded(id, value, duration_ms)
        }
        Ok(Ok(Err(err))) => {
            warn!(%id, %err, "operation failed");
            BatchResult::failed(id, err.to_string(), duration_ms)
        }
        Ok(Err(_panic)) => {
            warn!(%id, duration_ms, "operation panicked");
            BatchResult::failed(id, "operation panicked".to_owned(), duration_ms)
        }
        Err(_) => {
            warn!(%id, timeout_ms, "operation timed out");
            BatchResult::failed(
                id,
                format!("operation timed out after {timeout_ms}ms"),
                duration_ms,
            )
        }
    };

    Settled {
        index,
        operation,
        result,
    }
}

fn validate_operations(operations: &[BatchOperation]) -> BatchRunResult<()> {
    if operations.is_empty() || operations.len() > MAX_OPERATIONS {
        return Err(InputError::OutOfRange {
            field: "operations",
            value: operations.len() as i128,
            min: 1,
            max: MAX_OPERATIONS as i128,
        }
        .into());
    }

    let mut seen = HashSet::with_capacity(operations.len());
    for operation in operations {
        ensure_not_empty("id", &operation.id)?;
        ensure_not_empty("type", &operation.op_type)?;
        if !seen.insert(operation.id.as_str()) {
            return Err(BatchError::DuplicateId {
                id: operation.id.clone(),
            });
        }
    }
    Ok(())
}
