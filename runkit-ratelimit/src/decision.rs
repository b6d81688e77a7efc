//! Decision type returned by the limiter.

use runkit_primitives::Timestamp;
use serde::Serialize;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether the request fits in the current window.
    pub allowed: bool,
    /// Requests still admissible in this window after this check.
    pub remaining: u64,
    /// Requests counted in this window after this check.
    pub current_count: u64,
    /// Whole seconds until the window resets, rounded up.
    pub reset_in_seconds: u64,
    /// Instant at which the window resets.
    pub reset_at: Timestamp,
}

impl RateLimitDecision {
    /// Returns `true` when the request was rejected.
    #[must_use]
    pub const fn is_limited(&self) -> bool {
        !self.allowed
    }
}
