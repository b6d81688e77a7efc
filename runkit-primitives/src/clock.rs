//! Wall-clock abstraction shared by the cache, retry, and rate-limit stores.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Point in time used by every store.
pub type Timestamp = DateTime<Utc>;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Timestamp;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests.
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &self.now())
            .finish()
    }
}

impl ManualClock {
    /// Creates a clock frozen at the supplied instant.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Creates a clock frozen at the current system time.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: std::time::Duration) {
        let delta = Duration::from_std(delta).unwrap_or(Duration::MAX);
        let mut guard = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = guard.checked_add_signed(delta).unwrap_or(*guard);
    }

    /// Pins the clock to an absolute instant.
    pub fn set(&self, instant: Timestamp) {
        let mut guard = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_now()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Milliseconds elapsed from `earlier` to `later`, saturating at zero.
#[must_use]
pub fn elapsed_millis(earlier: Timestamp, later: Timestamp) -> u64 {
    let millis = (later - earlier).num_milliseconds();
    u64::try_from(millis).unwrap_or(0)
}

/// Whole seconds remaining until `deadline`, rounded up.
///
/// Returns zero once the deadline has passed.
#[must_use]
pub fn seconds_until(now: Timestamp, deadline: Timestamp) -> u64 {
    let millis = elapsed_millis(now, deadline);
    millis.div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(std::time::Duration::from_millis(1500));
        assert_eq!(elapsed_millis(start, clock.now()), 1500);
    }

    #[test]
    fn elapsed_saturates_when_reversed() {
        let start = Utc::now();
        let earlier = start - Duration::seconds(5);
        assert_eq!(elapsed_millis(start, earlier), 0);
    }

    #[test]
    fn seconds_until_rounds_up() {
        let now = Utc::now();
        assert_eq!(seconds_until(now, now + Duration::milliseconds(1)), 1);
        assert_eq!(seconds_until(now, now + Duration::milliseconds(1000)), 1);
        assert_eq!(seconds_until(now, now + Duration::milliseconds(1001)), 2);
        assert_eq!(seconds_until(now, now - Duration::seconds(1)), 0);
    }
}
