//! Retry decision engine keyed by caller-supplied operation ids.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use runkit_primitives::{Clock, SystemClock, ensure_not_empty, elapsed_millis};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::state::{RetryPhase, RetryRecord, RetrySnapshot};
use crate::RetryPolicy;

/// Age after which an id's state is discarded, whatever its phase.
pub const DEFAULT_GC_HORIZON: Duration = Duration::from_secs(60 * 60);

/// Verdict returned by [`RetryTracker::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    /// Success was already reported; nothing to do.
    AlreadySucceeded,
    /// Attempt budget is used up.
    MaxRetriesExceeded,
    /// Backoff delay has not elapsed; see `wait_ms`.
    RetryDelayed,
    /// An attempt may start; nothing was recorded because execution was not requested.
    ReadyToExecute,
    /// An attempt was recorded; the caller should perform it now.
    ExecuteAttempt,
}

/// Structured decision with enough metadata to act without polling blindly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryDecision {
    /// Verdict for this check.
    pub status: RetryStatus,
    /// Attempts recorded after this check.
    pub attempts: u32,
    /// Budget the check was evaluated against.
    pub max_retries: u32,
    /// Remaining backoff when `status` is [`RetryStatus::RetryDelayed`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<u64>,
    /// One-based attempt number when `status` is [`RetryStatus::ExecuteAttempt`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Backoff that will apply before the following attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_delay_ms: Option<u64>,
    /// Stored phase after this check.
    pub phase: RetryPhase,
}

impl RetryDecision {
    fn bare(status: RetryStatus, record: &RetryRecord, max_retries: u32) -> Self {
        Self {
            status,
            attempts: record.attempts,
            max_retries,
            wait_ms: None,
            attempt: None,
            next_delay_ms: None,
            phase: record.phase,
        }
    }
}

/// Errors produced by the retry tracker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// A caller-supplied argument was rejected; no state was touched.
    #[error(transparent)]
    InvalidInput(#[from] runkit_primitives::Error),
    /// Outcome reported for an id the tracker has never seen (or already collected).
    #[error("operation `{operation_id}` is not tracked")]
    UnknownOperation {
        /// Offending identifier.
        operation_id: String,
    },
    /// Outcome reported from a phase that cannot accept it.
    #[error("operation `{operation_id}` cannot record {outcome} while {from:?}")]
    InvalidTransition {
        /// Offending identifier.
        operation_id: String,
        /// Phase at the time of the report.
        from: RetryPhase,
        /// Outcome being reported.
        outcome: &'static str,
    },
    /// The state map lock was poisoned by a panicking writer.
    #[error("retry store lock poisoned")]
    Poisoned,
}

/// Result alias for retry operations.
pub type RetryResult<T> = Result<T, RetryError>;

/// Tracks attempts and backoff per operation id.
pub struct RetryTracker {
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, RetryRecord>>,
}

impl fmt::Debug for RetryTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = self.records.lock().map(|records| records.len()).ok();
        f.debug_struct("RetryTracker")
            .field("tracked", &tracked)
            .finish_non_exhaustive()
    }
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl RetryTracker {
    /// Creates an empty tracker reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> RetryResult<MutexGuard<'_, HashMap<String, RetryRecord>>> {
        self.records.lock().map_err(|_| RetryError::Poisoned)
    }

    /// Decides whether `operation_id` may be attempted now.
    ///
    /// The id is created on first sight. When `should_execute` is `false` the
    /// check is a dry run and never records an attempt.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::InvalidInput`] for an empty id and
    /// [`RetryError::Poisoned`] on lock poisoning.
    pub fn check(
        &self,
        operation_id: &str,
        operation_type: &str,
        operation_data: &Value,
        policy: RetryPolicy,
        should_execute: bool,
    ) -> RetryResult<RetryDecision> {
        ensure_not_empty("operationId", operation_id)?;
        let now = self.clock.now();
        let mut records = self.lock()?;
        let record = records.entry(operation_id.to_owned()).or_insert_with(|| {
            RetryRecord::new(operation_type.to_owned(), operation_data.clone(), now)
        });

        let max_retries = policy.max_retries();
        let decision =
            |status, record: &RetryRecord| RetryDecision::bare(status, record, max_retries);

        if record.phase == RetryPhase::Succeeded {
            return Ok(decision(RetryStatus::AlreadySucceeded, &*record));
        }

        if record.phase == RetryPhase::Exhausted || record.attempts >= max_retries {
            if record.phase != RetryPhase::Exhausted {
                warn!(operation_id, attempts = record.attempts, "retry budget exhausted");
                record.phase = RetryPhase::Exhausted;
            }
            return Ok(decision(RetryStatus::MaxRetriesExceeded, &*record));
        }

        let required = policy.required_delay_ms(record.attempts);
        if let Some(last) = record.last_attempt_at {
            let elapsed = elapsed_millis(last, now);
            if record.attempts > 0 && elapsed < required {
                let wait_ms = required - elapsed;
                debug!(operation_id, wait_ms, "retry delayed");
                return Ok(RetryDecision {
                    wait_ms: Some(wait_ms),
                    ..decision(RetryStatus::RetryDelayed, &*record)
                });
            }
        }

        if !should_execute {
            return Ok(decision(RetryStatus::ReadyToExecute, &*record));
        }

        record.attempts += 1;
        record.last_attempt_at = Some(now);
        record.policy = Some(policy);
        record.phase = RetryPhase::Executing;
        debug!(
            operation_id,
            operation_type = %record.operation_type,
            attempt = record.attempts,
            "retry attempt granted"
        );

        Ok(RetryDecision {
            attempt: Some(record.attempts),
            next_delay_ms: Some(policy.required_delay_ms(record.attempts)),
            ..decision(RetryStatus::ExecuteAttempt, &*record)
        })
    }

    /// Marks `operation_id` as succeeded. Repeated reports are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::UnknownOperation`] for untracked ids and
    /// [`RetryError::InvalidTransition`] when the id was never attempted or is
    /// already exhausted.
    pub fn record_success(&self, operation_id: &str) -> RetryResult<RetrySnapshot> {
        let now = self.clock.now();
        let mut records = self.lock()?;
        let record = records
            .get_mut(operation_id)
            .ok_or_else(|| RetryError::UnknownOperation {
                operation_id: operation_id.to_owned(),
            })?;

        match record.phase {
            RetryPhase::Executing | RetryPhase::PendingDelay | RetryPhase::Succeeded => {
                record.phase = RetryPhase::Succeeded;
                debug!(operation_id, attempts = record.attempts, "operation succeeded");
                Ok(record.snapshot(operation_id, now))
            }
            from => Err(RetryError::InvalidTransition {
                operation_id: operation_id.to_owned(),
                from,
                outcome: "success",
            }),
        }
    }

    /// Records a failed attempt, leaving the id in backoff until its next check.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::UnknownOperation`] for untracked ids and
    /// [`RetryError::InvalidTransition`] unless an attempt is outstanding.
    pub fn record_failure(
        &self,
        operation_id: &str,
        reason: impl Into<String>,
    ) -> RetryResult<RetrySnapshot> {
        let now = self.clock.now();
        let mut records = self.lock()?;
        let record = records
            .get_mut(operation_id)
            .ok_or_else(|| RetryError::UnknownOperation {
                operation_id: operation_id.to_owned(),
            })?;

        match record.phase {
            RetryPhase::Executing | RetryPhase::PendingDelay => {
                let reason = reason.into();
                warn!(operation_id, attempt = record.attempts, %reason, "operation attempt failed");
                record.phase = RetryPhase::PendingDelay;
                record.last_error = Some(reason);
                Ok(record.snapshot(operation_id, now))
            }
            from => Err(RetryError::InvalidTransition {
                operation_id: operation_id.to_owned(),
                from,
                outcome: "failure",
            }),
        }
    }

    /// Returns the current state of `operation_id`, if tracked.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Poisoned`] on lock poisoning.
    pub fn snapshot(&self, operation_id: &str) -> RetryResult<Option<RetrySnapshot>> {
        let now = self.clock.now();
        let records = self.lock()?;
        Ok(records
            .get(operation_id)
            .map(|record| record.snapshot(operation_id, now)))
    }

    /// Number of ids currently tracked.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Poisoned`] on lock poisoning.
    pub fn len(&self) -> RetryResult<usize> {
        Ok(self.lock()?.len())
    }

    /// Returns `true` when no ids are tracked.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Poisoned`] on lock poisoning.
    pub fn is_empty(&self) -> RetryResult<bool> {
        Ok(self.lock()?.is_empty())
    }

    /// Discards every id whose last activity is older than `horizon`,
    /// terminal or not. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Poisoned`] on lock poisoning.
    pub fn purge_stale(&self, horizon: Duration) -> RetryResult<usize> {
        let now = self.clock.now();
        let horizon_ms = u64::try_from(horizon.as_millis()).unwrap_or(u64::MAX);
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, record| elapsed_millis(record.last_activity(), now) <= horizon_ms);
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, "stale retry state collected");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use runkit_primitives::ManualClock;
    use serde_json::json;

    fn tracker() -> (Arc<ManualClock>, RetryTracker) {
        let clock = Arc::new(ManualClock::starting_now());
        let tracker = RetryTracker::new(clock.clone());
        (clock, tracker)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, 1_000).unwrap()
    }

    fn check(tracker: &RetryTracker, id: &str) -> RetryDecision {
        tracker
            .check(id, "http", &json!({"url": "/ping"}), policy(), true)
            .unwrap()
    }

    #[test]
    fn exhausts_after_budget_and_never_grants_more() {
        let (clock, tracker) = tracker();

        for expected in 1..=3 {
            let decision = check(&tracker, "op-1");
            assert_eq!(decision.status, RetryStatus::ExecuteAttempt);
            assert_eq!(decision.attempt, Some(expected));
            clock.advance(Duration::from_secs(60));
        }

        for _ in 0..3 {
            let decision = check(&tracker, "op-1");
            assert_eq!(decision.status, RetryStatus::MaxRetriesExceeded);
            assert_eq!(decision.attempts, 3);
            assert_eq!(decision.phase, RetryPhase::Exhausted);
        }
    }

    #[test]
    fn early_check_is_delayed_without_counting() {
        let (clock, tracker) = tracker();
        check(&tracker, "op-1");
        clock.advance(Duration::from_millis(500));

        let decision = check(&tracker, "op-1");
        assert_eq!(decision.status, RetryStatus::RetryDelayed);
        // Second attempt waits initial * 2^1.
        assert_eq!(decision.wait_ms, Some(1_500));
        assert_eq!(decision.attempts, 1);

        clock.advance(Duration::from_millis(1_500));
        let decision = check(&tracker, "op-1");
        assert_eq!(decision.status, RetryStatus::ExecuteAttempt);
        assert_eq!(decision.attempt, Some(2));
        assert_eq!(decision.next_delay_ms, Some(4_000));
    }

    #[test]
    fn dry_run_never_records_attempts() {
        let (_clock, tracker) = tracker();
        for _ in 0..5 {
            let decision = tracker
                .check("op-1", "http", &Value::Null, policy(), false)
                .unwrap();
            assert_eq!(decision.status, RetryStatus::ReadyToExecute);
            assert_eq!(decision.attempts, 0);
        }
        let snapshot = tracker.snapshot("op-1").unwrap().unwrap();
        assert_eq!(snapshot.phase, RetryPhase::New);
    }

    #[test]
    fn succeeded_is_terminal_and_idempotent() {
        let (clock, tracker) = tracker();
        check(&tracker, "op-1");
        tracker.record_success("op-1").unwrap();
        tracker.record_success("op-1").unwrap();

        for _ in 0..4 {
            clock.advance(Duration::from_secs(30));
            let decision = check(&tracker, "op-1");
            assert_eq!(decision.status, RetryStatus::AlreadySucceeded);
            assert_eq!(decision.attempts, 1);
        }
    }

    #[test]
    fn exhausted_cannot_be_revived_by_a_larger_budget() {
        let (clock, tracker) = tracker();
        let small = RetryPolicy::new(1, 100).unwrap();
        tracker.check("op-1", "t", &Value::Null, small, true).unwrap();
        clock.advance(Duration::from_secs(1));
        let decision = tracker.check("op-1", "t", &Value::Null, small, true).unwrap();
        assert_eq!(decision.status, RetryStatus::MaxRetriesExceeded);

        let larger = RetryPolicy::new(10, 100).unwrap();
        let decision = tracker.check("op-1", "t", &Value::Null, larger, true).unwrap();
        assert_eq!(decision.status, RetryStatus::MaxRetriesExceeded);

        let err = tracker.record_success("op-1").unwrap_err();
        assert!(matches!(
            err,
            RetryError::InvalidTransition {
                from: RetryPhase::Exhausted,
                ..
            }
        ));
    }

    #[test]
    fn failure_moves_into_backoff_then_ready() {
        let (clock, tracker) = tracker();
        check(&tracker, "op-1");
        let snapshot = tracker.record_failure("op-1", "connection reset").unwrap();
        assert_eq!(snapshot.phase, RetryPhase::PendingDelay);
        assert_eq!(snapshot.last_error.as_deref(), Some("connection reset"));

        clock.advance(Duration::from_millis(2_000));
        let snapshot = tracker.snapshot("op-1").unwrap().unwrap();
        assert_eq!(snapshot.phase, RetryPhase::Ready);
    }

    #[test]
    fn outcomes_for_unknown_ids_error() {
        let (_clock, tracker) = tracker();
        assert!(matches!(
            tracker.record_success("missing").unwrap_err(),
            RetryError::UnknownOperation { .. }
        ));
        assert!(matches!(
            tracker.record_failure("missing", "x").unwrap_err(),
            RetryError::UnknownOperation { .. }
        ));
    }

    #[test]
    fn purge_removes_stale_ids_regardless_of_phase() {
        let (clock, tracker) = tracker();
        check(&tracker, "done");
        tracker.record_success("done").unwrap();
        check(&tracker, "pending");

        clock.advance(Duration::from_secs(30 * 60));
        check(&tracker, "fresh");
        clock.advance(Duration::from_secs(31 * 60));

        assert_eq!(tracker.purge_stale(DEFAULT_GC_HORIZON).unwrap(), 2);
        assert!(tracker.snapshot("done").unwrap().is_none());
        assert!(tracker.snapshot("fresh").unwrap().is_some());
        assert_eq!(tracker.len().unwrap(), 1);
    }

    #[test]
    fn empty_id_is_rejected_without_state() {
        let (_clock, tracker) = tracker();
        let err = tracker
            .check("", "t", &Value::Null, policy(), true)
            .unwrap_err();
        assert!(matches!(err, RetryError::InvalidInput(_)));
        assert!(tracker.is_empty().unwrap());
    }
}
