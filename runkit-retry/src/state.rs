//! Per-operation retry state and its derived phase.

use runkit_primitives::{Timestamp, elapsed_millis};
use serde::Serialize;
use serde_json::Value;

use crate::RetryPolicy;

/// Phases an operation id moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryPhase {
    /// Known to the tracker but never attempted.
    New,
    /// Last attempt failed and its backoff delay has not yet elapsed.
    PendingDelay,
    /// Last attempt failed and the backoff delay has elapsed.
    Ready,
    /// An attempt was handed to the caller and no outcome was reported yet.
    Executing,
    /// Caller reported success. Terminal.
    Succeeded,
    /// Attempt budget used up. Terminal.
    Exhausted,
}

impl RetryPhase {
    /// Returns `true` for phases that no check can leave.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RetryRecord {
    pub(crate) operation_type: String,
    pub(crate) operation_data: Value,
    pub(crate) attempts: u32,
    pub(crate) created_at: Timestamp,
    pub(crate) last_attempt_at: Option<Timestamp>,
    pub(crate) last_error: Option<String>,
    pub(crate) policy: Option<RetryPolicy>,
    // Only New, Executing, PendingDelay, Succeeded, or Exhausted are stored;
    // Ready is derived from the clock.
    pub(crate) phase: RetryPhase,
}

impl RetryRecord {
    pub(crate) fn new(operation_type: String, operation_data: Value, now: Timestamp) -> Self {
        Self {
            operation_type,
            operation_data,
            attempts: 0,
            created_at: now,
            last_attempt_at: None,
            last_error: None,
            policy: None,
            phase: RetryPhase::New,
        }
    }

    pub(crate) fn last_activity(&self) -> Timestamp {
        self.last_attempt_at.unwrap_or(self.created_at)
    }

    pub(crate) fn effective_phase(&self, now: Timestamp) -> RetryPhase {
        match (self.phase, self.policy, self.last_attempt_at) {
            (RetryPhase::PendingDelay, Some(policy), Some(last)) => {
                if elapsed_millis(last, now) >= policy.required_delay_ms(self.attempts) {
                    RetryPhase::Ready
                } else {
                    RetryPhase::PendingDelay
                }
            }
            (phase, _, _) => phase,
        }
    }

    pub(crate) fn snapshot(&self, operation_id: &str, now: Timestamp) -> RetrySnapshot {
        RetrySnapshot {
            operation_id: operation_id.to_owned(),
            operation_type: self.operation_type.clone(),
            operation_data: self.operation_data.clone(),
            attempts: self.attempts,
            last_attempt_at: self.last_attempt_at,
            last_error: self.last_error.clone(),
            phase: self.effective_phase(now),
        }
    }
}

/// Read-only view of an operation's retry state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySnapshot {
    /// Caller-supplied identifier.
    pub operation_id: String,
    /// Caller-supplied operation type recorded on first check.
    pub operation_type: String,
    /// Caller-supplied operation payload recorded on first check.
    pub operation_data: Value,
    /// Attempts handed out so far.
    pub attempts: u32,
    /// Time of the most recent attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<Timestamp>,
    /// Reason supplied with the most recent reported failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Current phase, with backoff expiry applied.
    pub phase: RetryPhase,
}
