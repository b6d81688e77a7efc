//! Periodic task reclaiming expired cache entries.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use runkit_primitives::Error as InputError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{CacheResult, TtlCache};

/// Handle controlling a running sweeper task.
///
/// Dropping the handle stops the task.
pub struct SweeperHandle {
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    interval: Duration,
}

impl fmt::Debug for SweeperHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SweeperHandle")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SweeperHandle {
    /// Returns the configured sweep interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` while the sweeper task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Stops the sweeper. Calling this more than once is a no-op.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.abort();
            info!("cache sweeper stopped");
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawns a task on the current tokio runtime that calls
/// [`TtlCache::sweep_expired`] every `interval`.
///
/// The task holds only a weak reference and exits once the cache is dropped.
///
/// # Errors
///
/// Returns [`CacheError::InvalidInput`](crate::CacheError::InvalidInput) when
/// `interval` is zero.
///
/// # Panics
///
/// Panics when called outside a tokio runtime.
pub fn spawn_sweeper(cache: &Arc<TtlCache>, interval: Duration) -> CacheResult<SweeperHandle> {
    if interval.is_zero() {
        return Err(InputError::invalid("sweepInterval", "must be greater than zero").into());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let worker = tokio::spawn(run_sweep_loop(
        Arc::downgrade(cache),
        Arc::clone(&shutdown),
        interval,
    ));
    info!(?interval, "cache sweeper started");

    Ok(SweeperHandle {
        shutdown,
        worker: Some(worker),
        interval,
    })
}

async fn run_sweep_loop(cache: Weak<TtlCache>, shutdown: Arc<AtomicBool>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    while !shutdown.load(Ordering::Acquire) {
        ticker.tick().await;
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let Some(cache) = cache.upgrade() else {
            debug!("cache dropped; sweeper exiting");
            break;
        };

        match cache.sweep_expired() {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "swept expired cache entries"),
            Err(err) => {
                warn!(?err, "cache sweep failed; sweeper exiting");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use runkit_primitives::ManualClock;
    use serde_json::json;

    use crate::{CacheError, DEFAULT_NAMESPACE};

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_interval_and_stops() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = Arc::new(TtlCache::new(clock.clone()));
        cache.put("k", json!(1), 1, DEFAULT_NAMESPACE).unwrap();

        let mut handle = spawn_sweeper(&cache, Duration::from_secs(60)).unwrap();
        assert!(handle.is_running());

        clock.advance(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(61)).await;

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 0);
        assert!(stats.sweeps >= 1);

        handle.stop();
        tokio::task::yield_now().await;
        assert!(!handle.is_running());

        let sweeps = cache.stats().unwrap().sweeps;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(cache.stats().unwrap().sweeps, sweeps);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let cache = Arc::new(TtlCache::default());
        let err = spawn_sweeper(&cache, Duration::ZERO).unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)));
    }
}
