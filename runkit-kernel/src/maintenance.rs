//! Periodic housekeeping for retry state and rate windows.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use runkit_ratelimit::RateLimiter;
use runkit_retry::RetryTracker;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Settings for the housekeeping task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceConfig {
    /// Period between passes.
    pub interval: Duration,
    /// Retry state idle for longer than this is collected.
    pub retry_horizon: Duration,
}

/// Handle controlling the housekeeping task. Dropping it stops the task.
pub struct MaintenanceHandle {
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for MaintenanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaintenanceHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

impl MaintenanceHandle {
    /// Returns `true` while the task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Stops the task. Calling this more than once is a no-op.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.abort();
            info!("maintenance task stopped");
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawns the housekeeping task on the current tokio runtime.
///
/// The task holds weak references and exits once both stores are dropped.
pub(crate) fn spawn_maintenance(
    retry: &Arc<RetryTracker>,
    limiter: &Arc<RateLimiter>,
    config: MaintenanceConfig,
) -> MaintenanceHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let worker = tokio::spawn(run_maintenance_loop(
        Arc::downgrade(retry),
        Arc::downgrade(limiter),
        Arc::clone(&shutdown),
        config,
    ));
    info!(interval = ?config.interval, "maintenance task started");

    MaintenanceHandle {
        shutdown,
        worker: Some(worker),
    }
}

async fn run_maintenance_loop(
    retry: Weak<RetryTracker>,
    limiter: Weak<RateLimiter>,
    shutdown: Arc<AtomicBool>,
    config: MaintenanceConfig,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    while !shutdown.load(Ordering::Acquire) {
        ticker.tick().await;
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let (retry, limiter) = (retry.upgrade(), limiter.upgrade());
        if retry.is_none() && limiter.is_none() {
            debug!("stores dropped; maintenance task exiting");
            break;
        }

        if let Some(retry) = retry {
            match retry.purge_stale(config.retry_horizon) {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "collected stale retry state"),
                Err(err) => warn!(?err, "retry collection failed"),
            }
        }
        if let Some(limiter) = limiter {
            match limiter.purge_expired() {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "purged elapsed rate windows"),
                Err(err) => warn!(?err, "rate window purge failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use runkit_primitives::ManualClock;
    use runkit_ratelimit::WindowSpec;
    use runkit_retry::RetryPolicy;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn collects_stale_state_on_each_pass() {
        let clock = Arc::new(ManualClock::starting_now());
        let retry = Arc::new(RetryTracker::new(clock.clone()));
        let limiter = Arc::new(RateLimiter::new(clock.clone()));

        let policy = RetryPolicy::new(3, 100).unwrap();
        retry.check("op", "sync", &json!({}), policy, true).unwrap();
        limiter
            .check("api", WindowSpec::new(5, 10).unwrap(), true)
            .unwrap();

        let mut handle = spawn_maintenance(
            &retry,
            &limiter,
            MaintenanceConfig {
                interval: Duration::from_secs(30),
                retry_horizon: Duration::from_secs(60),
            },
        );

        clock.advance(Duration::from_secs(120));
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(retry.is_empty().unwrap());
        assert_eq!(limiter.tracked_resources().unwrap(), 0);

        assert!(handle.is_running());
        handle.stop();
        handle.stop();
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn exits_once_stores_are_dropped() {
        let clock = Arc::new(ManualClock::starting_now());
        let retry = Arc::new(RetryTracker::new(clock.clone()));
        let limiter = Arc::new(RateLimiter::new(clock));
        let handle = spawn_maintenance(
            &retry,
            &limiter,
            MaintenanceConfig {
                interval: Duration::from_secs(1),
                retry_horizon: Duration::from_secs(60),
            },
        );

        drop(retry);
        drop(limiter);
        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(!handle.is_running());
    }
}
