//! Per-resource fixed-window counters.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use runkit_primitives::{
    Clock, SystemClock, Timestamp, ensure_in_range, ensure_not_empty, seconds_until,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::RateLimitDecision;

/// Default admissions per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 60;
/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 60;
/// Longest accepted window, in seconds.
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// Validated limit applied to one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    max_requests: u64,
    window_secs: u64,
}

impl WindowSpec {
    /// Creates a window specification.
    ///
    /// # Errors
    ///
    /// Returns [`runkit_primitives::Error::OutOfRange`] when `max_requests` is
    /// zero or `window_secs` lies outside `1..=86400`. The request limit has no
    /// upper bound.
    pub fn new(max_requests: u64, window_secs: u64) -> Result<Self, runkit_primitives::Error> {
        ensure_in_range("maxRequests", max_requests, 1, u64::MAX)?;
        ensure_in_range("windowSeconds", window_secs, 1, MAX_WINDOW_SECS)?;
        Ok(Self {
            max_requests,
            window_secs,
        })
    }

    /// Returns the admission limit.
    #[must_use]
    pub const fn max_requests(self) -> u64 {
        self.max_requests
    }

    /// Returns the window length in seconds.
    #[must_use]
    pub const fn window_secs(self) -> u64 {
        self.window_secs
    }
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u64,
    reset_at: Timestamp,
}

/// Errors produced by the limiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// A caller-supplied argument was rejected; no window was touched.
    #[error(transparent)]
    InvalidInput(#[from] runkit_primitives::Error),
    /// The window map lock was poisoned by a panicking writer.
    #[error("rate limit store lock poisoned")]
    Poisoned,
}

/// Result alias for limiter operations.
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Fixed-window limiter holding one window per resource.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = self.windows.lock().map(|windows| windows.len()).ok();
        f.debug_struct("RateLimiter")
            .field("tracked", &tracked)
            .finish_non_exhaustive()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl RateLimiter {
    /// Creates a limiter reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> RateLimitResult<MutexGuard<'_, HashMap<String, RateWindow>>> {
        self.windows.lock().map_err(|_| RateLimitError::Poisoned)
    }

    /// Checks `resource` against `spec`, counting the request when it is
    /// admitted and `increment` is set.
    ///
    /// A missing or elapsed window is replaced by a fresh one before the
    /// comparison, inside the same critical section.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::InvalidInput`] for an empty resource and
    /// [`RateLimitError::Poisoned`] on lock poisoning.
    pub fn check(
        &self,
        resource: &str,
        spec: WindowSpec,
        increment: bool,
    ) -> RateLimitResult<RateLimitDecision> {
        ensure_not_empty("resource", resource)?;
        let now = self.clock.now();
        // Bounded by MAX_WINDOW_SECS, so the cast cannot wrap.
        #[allow(clippy::cast_possible_wrap)]
        let window_len = Duration::seconds(spec.window_secs() as i64);

        let mut windows = self.lock()?;
        let window = windows
            .entry(resource.to_owned())
            .or_insert_with(|| RateWindow {
                count: 0,
                reset_at: now + window_len,
            });

        if now >= window.reset_at {
            debug!(resource, previous = window.count, "rate window reset");
            *window = RateWindow {
                count: 0,
                reset_at: now + window_len,
            };
        }

        let allowed = window.count < spec.max_requests();
        if allowed && increment {
            window.count += 1;
        }
        if !allowed {
            warn!(resource, limit = spec.max_requests(), "rate limit exceeded");
        }

        Ok(RateLimitDecision {
            allowed,
            remaining: spec.max_requests().saturating_sub(window.count),
            current_count: window.count,
            reset_in_seconds: seconds_until(now, window.reset_at),
            reset_at: window.reset_at,
        })
    }

    /// Inspects `resource` without counting a request.
    ///
    /// # Errors
    ///
    /// Same as [`check`](Self::check).
    pub fn peek(&self, resource: &str, spec: WindowSpec) -> RateLimitResult<RateLimitDecision> {
        self.check(resource, spec, false)
    }

    /// Drops the window of `resource`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Poisoned`] on lock poisoning.
    pub fn reset(&self, resource: &str) -> RateLimitResult<bool> {
        Ok(self.lock()?.remove(resource).is_some())
    }

    /// Drops every window whose reset instant has passed. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Poisoned`] on lock poisoning.
    pub fn purge_expired(&self) -> RateLimitResult<usize> {
        let now = self.clock.now();
        let mut windows = self.lock()?;
        let before = windows.len();
        windows.retain(|_, window| now < window.reset_at);
        Ok(before - windows.len())
    }

    /// Number of resources with a window, live or elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Poisoned`] on lock poisoning.
    pub fn tracked_resources(&self) -> RateLimitResult<usize> {
        Ok(self.lock()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use runkit_primitives::ManualClock;

    fn limiter() -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::starting_now());
        let limiter = RateLimiter::new(clock.clone());
        (clock, limiter)
    }

    #[test]
    fn counts_down_then_rejects() {
        let (_clock, limiter) = limiter();
        let spec = WindowSpec::new(5, 60).unwrap();

        for expected in [4, 3, 2, 1, 0] {
            let decision = limiter.check("api", spec, true).unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        let decision = limiter.check("api", spec, true).unwrap();
        assert!(decision.is_limited());
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.current_count, 5);
        assert_eq!(decision.reset_in_seconds, 60);
    }

    #[test]
    fn window_resets_after_deadline() {
        let (clock, limiter) = limiter();
        let spec = WindowSpec::new(5, 60).unwrap();
        for _ in 0..6 {
            limiter.check("api", spec, true).unwrap();
        }

        clock.advance(std::time::Duration::from_secs(60));
        let decision = limiter.check("api", spec, true).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.current_count, 1);
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn boundary_burst_admits_twice_the_limit() {
        let (clock, limiter) = limiter();
        let spec = WindowSpec::new(3, 10).unwrap();
        for _ in 0..3 {
            assert!(limiter.check("burst", spec, true).unwrap().allowed);
        }
        clock.advance(std::time::Duration::from_secs(10));
        for _ in 0..3 {
            assert!(limiter.check("burst", spec, true).unwrap().allowed);
        }
    }

    #[test]
    fn peek_does_not_count() {
        let (_clock, limiter) = limiter();
        let spec = WindowSpec::new(2, 60).unwrap();
        for _ in 0..5 {
            let decision = limiter.peek("api", spec).unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.current_count, 0);
            assert_eq!(decision.remaining, 2);
        }
    }

    #[test]
    fn resources_are_independent() {
        let (_clock, limiter) = limiter();
        let spec = WindowSpec::new(1, 60).unwrap();
        assert!(limiter.check("a", spec, true).unwrap().allowed);
        assert!(limiter.check("b", spec, true).unwrap().allowed);
        assert!(!limiter.check("a", spec, true).unwrap().allowed);
    }

    #[test]
    fn purge_and_reset_drop_windows() {
        let (clock, limiter) = limiter();
        let spec = WindowSpec::new(1, 10).unwrap();
        limiter.check("short", spec, true).unwrap();
        limiter
            .check("long", WindowSpec::new(1, 120).unwrap(), true)
            .unwrap();

        clock.advance(std::time::Duration::from_secs(11));
        assert_eq!(limiter.purge_expired().unwrap(), 1);
        assert!(limiter.reset("long").unwrap());
        assert!(!limiter.reset("long").unwrap());
        assert_eq!(limiter.tracked_resources().unwrap(), 0);
    }

    #[test]
    fn rejects_invalid_specs() {
        assert!(WindowSpec::new(0, 60).is_err());
        assert!(WindowSpec::new(5, 0).is_err());
        assert!(WindowSpec::new(5, MAX_WINDOW_SECS + 1).is_err());
    }

    #[test]
    fn request_limit_has_no_ceiling() {
        let (_clock, limiter) = limiter();
        let spec = WindowSpec::new(2_000_000, 60).unwrap();
        let decision = limiter.check("bulk", spec, true).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1_999_999);

        let widest = WindowSpec::new(u64::MAX, 60).unwrap();
        assert_eq!(widest.max_requests(), u64::MAX);
    }

    #[test]
    fn decision_serializes_camel_case() {
        let (_clock, limiter) = limiter();
        let decision = limiter.check("api", WindowSpec::default(), true).unwrap();
        let value = serde_json::to_value(decision).unwrap();
        assert_eq!(value["currentCount"], 1);
        assert_eq!(value["remaining"], 59);
        assert!(value.get("resetAt").is_some());
    }
}
