//! The utility service: owns every store and dispatches named operations.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use runkit_batch::{
    BatchOperation, BatchOptions, BatchReport, BatchRunner, OperationExecutor, SimulatedExecutor,
};
use runkit_cache::{
    CacheClear, CacheDelete, CacheLookup, CachePut, CacheStats, SweeperHandle, TtlCache,
    spawn_sweeper,
};
use runkit_config::RuntimeConfig;
use runkit_primitives::{Clock, SystemClock};
use runkit_ratelimit::{RateLimitDecision, RateLimiter, WindowSpec};
use runkit_retry::{RetryDecision, RetryPolicy, RetrySnapshot, RetryTracker};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::lifecycle::{Lifecycle, LifecycleEvent, ServiceState};
use crate::maintenance::{MaintenanceConfig, MaintenanceHandle, spawn_maintenance};
use crate::operations::{
    BatchArgs, CacheClearArgs, CacheDeleteArgs, CacheGetArgs, CachePutArgs, OperationName,
    RateLimitArgs, RetryArgs, decode_args,
};
use crate::{ServiceError, ServiceResult};

/// Builder for [`UtilityService`].
pub struct UtilityServiceBuilder {
    config: RuntimeConfig,
    clock: Option<Arc<dyn Clock>>,
    executor: Option<Arc<dyn OperationExecutor>>,
}

impl fmt::Debug for UtilityServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtilityServiceBuilder")
            .field("config", &self.config)
            .field("custom_clock", &self.clock.is_some())
            .field("custom_executor", &self.executor.is_some())
            .finish()
    }
}

impl UtilityServiceBuilder {
    /// Replaces the wall clock, typically with a
    /// [`ManualClock`](runkit_primitives::ManualClock) in tests.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the executor performing batch work. Defaults to
    /// [`SimulatedExecutor`].
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn OperationExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Builds the service and starts its background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidConfig`] when the configuration fails
    /// validation.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn build(self) -> ServiceResult<UtilityService> {
        self.config
            .validate()
            .map_err(|err| ServiceError::InvalidConfig(format!("{err:#}")))?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let executor: Arc<dyn OperationExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(SimulatedExecutor::new(Arc::clone(&clock))),
        };

        let cache = Arc::new(TtlCache::new(Arc::clone(&clock)));
        let retry = Arc::new(RetryTracker::new(Arc::clone(&clock)));
        let limiter = Arc::new(RateLimiter::new(Arc::clone(&clock)));
        let batch = BatchRunner::new(executor).with_cache(Arc::clone(&cache));

        let sweeper = spawn_sweeper(&cache, self.config.cache.sweep_interval())?;
        let maintenance = spawn_maintenance(
            &retry,
            &limiter,
            MaintenanceConfig {
                interval: self.config.maintenance_interval(),
                retry_horizon: self.config.retry.gc_horizon(),
            },
        );

        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(LifecycleEvent::Start)?;
        info!("utility service started");

        Ok(UtilityService {
            config: self.config,
            cache,
            retry,
            limiter,
            batch,
            lifecycle: Mutex::new(lifecycle),
            sweeper: Mutex::new(Some(sweeper)),
            maintenance: Mutex::new(Some(maintenance)),
        })
    }
}

/// Owns the cache, retry tracker, rate limiter and batch runner of one
/// instance, plus the background tasks keeping them tidy.
///
/// Instances are independent. Dropping one stops its background tasks.
pub struct UtilityService {
    config: RuntimeConfig,
    cache: Arc<TtlCache>,
    retry: Arc<RetryTracker>,
    limiter: Arc<RateLimiter>,
    batch: BatchRunner,
    lifecycle: Mutex<Lifecycle>,
    sweeper: Mutex<Option<SweeperHandle>>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl fmt::Debug for UtilityService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtilityService")
            .field("state", &self.state().ok())
            .field("cache", &self.cache)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl UtilityService {
    /// Returns a builder over `config`.
    #[must_use]
    pub fn builder(config: RuntimeConfig) -> UtilityServiceBuilder {
        UtilityServiceBuilder {
            config,
            clock: None,
            executor: None,
        }
    }

    /// Creates a service with the wall clock and the simulated executor.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidConfig`] when the configuration fails
    /// validation.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn create(config: RuntimeConfig) -> ServiceResult<Self> {
        Self::builder(config).build()
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] on lock poisoning.
    pub fn state(&self) -> ServiceResult<ServiceState> {
        Ok(self.lifecycle()?.state())
    }

    /// Stops the background tasks and refuses further operations.
    /// Calling this more than once is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] on lock poisoning.
    pub fn shutdown(&self) -> ServiceResult<()> {
        let previous = {
            let mut lifecycle = self.lifecycle()?;
            let previous = lifecycle.state();
            lifecycle.transition(LifecycleEvent::Shutdown)?;
            previous
        };

        if let Some(mut sweeper) = take_handle(&self.sweeper)? {
            sweeper.stop();
        }
        if let Some(mut maintenance) = take_handle(&self.maintenance)? {
            maintenance.stop();
        }
        if previous != ServiceState::Stopped {
            info!("utility service stopped");
        }
        Ok(())
    }

    /// Returns `true` while background tasks are alive.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] on lock poisoning.
    pub fn background_tasks_running(&self) -> ServiceResult<bool> {
        let sweeper = lock_internal(&self.sweeper)?
            .as_ref()
            .is_some_and(SweeperHandle::is_running);
        let maintenance = lock_internal(&self.maintenance)?
            .as_ref()
            .is_some_and(MaintenanceHandle::is_running);
        Ok(sweeper && maintenance)
    }

    fn lifecycle(&self) -> ServiceResult<MutexGuard<'_, Lifecycle>> {
        lock_internal(&self.lifecycle)
    }

    fn ensure_running(&self) -> ServiceResult<()> {
        if self.state()?.is_running() {
            Ok(())
        } else {
            Err(ServiceError::ShutDown)
        }
    }

    fn namespace<'a>(&'a self, namespace: Option<&'a str>) -> &'a str {
        namespace.unwrap_or(&self.config.cache.default_namespace)
    }

    /// Looks up `key`; a missing `namespace` selects the configured default.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidInput`] for empty keys,
    /// [`ServiceError::ShutDown`] after shutdown and
    /// [`ServiceError::Internal`] on lock poisoning.
    pub fn cache_get(&self, key: &str, namespace: Option<&str>) -> ServiceResult<CacheLookup> {
        self.ensure_running()?;
        Ok(self.cache.get(key, self.namespace(namespace))?)
    }

    /// Stores `value`; a missing `ttl_seconds` selects the configured default.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidInput`] when the TTL lies outside
    /// `1..=86400` or the key is empty.
    pub fn cache_put(
        &self,
        key: &str,
        value: Value,
        ttl_seconds: Option<u64>,
        namespace: Option<&str>,
    ) -> ServiceResult<CachePut> {
        self.ensure_running()?;
        let ttl_seconds = ttl_seconds.unwrap_or(self.config.cache.default_ttl_secs);
        Ok(self
            .cache
            .put(key, value, ttl_seconds, self.namespace(namespace))?)
    }

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Same as [`cache_get`](Self::cache_get).
    pub fn cache_delete(&self, key: &str, namespace: Option<&str>) -> ServiceResult<CacheDelete> {
        self.ensure_running()?;
        Ok(self.cache.delete(key, self.namespace(namespace))?)
    }

    /// Removes every entry of `namespace`, or every entry when `None`.
    ///
    /// # Errors
    ///
    /// Same as [`cache_get`](Self::cache_get).
    pub fn cache_clear(&self, namespace: Option<&str>) -> ServiceResult<CacheClear> {
        self.ensure_running()?;
        Ok(self.cache.clear(namespace)?)
    }

    /// Returns cache counters.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] on lock poisoning.
    pub fn cache_stats(&self) -> ServiceResult<CacheStats> {
        Ok(self.cache.stats()?)
    }

    /// Builds a retry policy, filling omitted values from the configuration.
    ///
    /// An explicit `max_delay_ms` must not undercut the initial delay. The
    /// configured cap is raised to the initial delay instead of rejecting
    /// the call.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidInput`] for out-of-range values.
    pub fn retry_policy(
        &self,
        max_retries: Option<u32>,
        initial_delay_ms: Option<u64>,
        max_delay_ms: Option<u64>,
    ) -> ServiceResult<RetryPolicy> {
        let settings = &self.config.retry;
        let policy = RetryPolicy::new(
            max_retries.unwrap_or(settings.default_max_retries),
            initial_delay_ms.unwrap_or(settings.default_initial_delay_ms),
        )?;
        let policy = match (max_delay_ms, settings.max_delay_ms) {
            (Some(cap), _) => policy.with_max_delay_ms(cap)?,
            (None, Some(cap)) => policy.with_max_delay_ms(cap.max(policy.initial_delay_ms()))?,
            (None, None) => policy,
        };
        Ok(policy)
    }

    /// Consults the retry tracker for `operation_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidInput`] for an empty id,
    /// [`ServiceError::ShutDown`] after shutdown and
    /// [`ServiceError::Internal`] on lock poisoning.
    pub fn retry_operation(
        &self,
        operation_id: &str,
        operation_type: &str,
        operation_data: &Value,
        policy: RetryPolicy,
        should_execute: bool,
    ) -> ServiceResult<RetryDecision> {
        self.ensure_running()?;
        Ok(self.retry.check(
            operation_id,
            operation_type,
            operation_data,
            policy,
            should_execute,
        )?)
    }

    /// Reports that the outstanding attempt of `operation_id` succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Conflict`] when the id is untracked or has no
    /// attempt to succeed.
    pub fn retry_succeeded(&self, operation_id: &str) -> ServiceResult<RetrySnapshot> {
        self.ensure_running()?;
        Ok(self.retry.record_success(operation_id)?)
    }

    /// Reports that the outstanding attempt of `operation_id` failed.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Conflict`] when the id is untracked or has no
    /// outstanding attempt.
    pub fn retry_failed(
        &self,
        operation_id: &str,
        reason: impl Into<String>,
    ) -> ServiceResult<RetrySnapshot> {
        self.ensure_running()?;
        Ok(self.retry.record_failure(operation_id, reason)?)
    }

    /// Returns the stored retry state of `operation_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] on lock poisoning.
    pub fn retry_snapshot(&self, operation_id: &str) -> ServiceResult<Option<RetrySnapshot>> {
        Ok(self.retry.snapshot(operation_id)?)
    }

    /// Batch options seeded from the configuration.
    #[must_use]
    pub fn batch_options(&self) -> BatchOptions {
        let settings = &self.config.batch;
        BatchOptions {
            concurrency: settings.default_concurrency,
            timeout_ms: settings.default_timeout_ms,
            cache_ttl_seconds: settings.default_cache_ttl_secs,
            ..BatchOptions::default()
        }
    }

    /// Runs `operations` through the configured executor.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidInput`] when the call is malformed and
    /// [`ServiceError::ShutDown`] after shutdown. Operation failures are
    /// reported per item.
    pub async fn batch_operation(
        &self,
        operations: Vec<BatchOperation>,
        options: BatchOptions,
    ) -> ServiceResult<BatchReport> {
        self.ensure_running()?;
        Ok(self.batch.run(operations, options).await?)
    }

    /// Builds a window specification, filling omitted values from the
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidInput`] for out-of-range values.
    pub fn window_spec(
        &self,
        max_requests: Option<u64>,
        window_secs: Option<u64>,
    ) -> ServiceResult<WindowSpec> {
        let settings = &self.config.rate_limit;
        Ok(WindowSpec::new(
            max_requests.unwrap_or(settings.default_max_requests),
            window_secs.unwrap_or(settings.default_window_secs),
        )?)
    }

    /// Checks `resource` against `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidInput`] for an empty resource,
    /// [`ServiceError::ShutDown`] after shutdown and
    /// [`ServiceError::Internal`] on lock poisoning.
    pub fn rate_limit_check(
        &self,
        resource: &str,
        spec: WindowSpec,
        increment: bool,
    ) -> ServiceResult<RateLimitDecision> {
        self.ensure_running()?;
        Ok(self.limiter.check(resource, spec, increment)?)
    }

    /// Invokes the operation called `name` with a JSON argument object and
    /// returns its JSON result.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnknownOperation`] for unrecognised names,
    /// [`ServiceError::MalformedArguments`] when `args` does not match the
    /// operation's contract, and whatever the typed operation returns.
    pub async fn call(&self, name: &str, args: Value) -> ServiceResult<Value> {
        let operation: OperationName = name.parse()?;
        self.ensure_running()?;
        debug!(%operation, "dispatching operation");

        match operation {
            OperationName::CacheGet => {
                let args: CacheGetArgs = decode_args(operation, args)?;
                to_json(&self.cache_get(&args.key, args.namespace.as_deref())?)
            }
            OperationName::CachePut => {
                let args: CachePutArgs = decode_args(operation, args)?;
                to_json(&self.cache_put(
                    &args.key,
                    args.value,
                    args.ttl_seconds,
                    args.namespace.as_deref(),
                )?)
            }
            OperationName::CacheDelete => {
                let args: CacheDeleteArgs = decode_args(operation, args)?;
                to_json(&self.cache_delete(&args.key, args.namespace.as_deref())?)
            }
            OperationName::CacheClear => {
                let args: CacheClearArgs = decode_args(operation, args)?;
                to_json(&self.cache_clear(args.namespace.as_deref())?)
            }
            OperationName::RetryOperation => {
                let args: RetryArgs = decode_args(operation, args)?;
                let policy =
                    self.retry_policy(args.max_retries, args.initial_delay_ms, args.max_delay_ms)?;
                to_json(&self.retry_operation(
                    &args.operation_id,
                    &args.operation_type,
                    &args.operation_data,
                    policy,
                    args.should_execute,
                )?)
            }
            OperationName::BatchOperation => {
                let args: BatchArgs = decode_args(operation, args)?;
                let defaults = self.batch_options();
                let options = BatchOptions {
                    concurrency: args.concurrency.unwrap_or(defaults.concurrency),
                    timeout_ms: args.timeout_ms.unwrap_or(defaults.timeout_ms),
                    continue_on_error: args.continue_on_error,
                    use_cache: args.use_cache,
                    cache_ttl_seconds: args.cache_ttl_seconds.unwrap_or(defaults.cache_ttl_seconds),
                };
                to_json(&self.batch_operation(args.operations, options).await?)
            }
            OperationName::RateLimitCheck => {
                let args: RateLimitArgs = decode_args(operation, args)?;
                let spec = self.window_spec(args.max_requests, args.window_seconds)?;
                to_json(&self.rate_limit_check(&args.resource, spec, args.increment)?)
            }
        }
    }
}

fn to_json<T: Serialize>(result: &T) -> ServiceResult<Value> {
    serde_json::to_value(result).map_err(|err| ServiceError::Internal(err.to_string()))
}

fn lock_internal<T>(mutex: &Mutex<T>) -> ServiceResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| ServiceError::Internal("service state lock poisoned".to_owned()))
}

fn take_handle<T>(slot: &Mutex<Option<T>>) -> ServiceResult<Option<T>> {
    Ok(lock_internal(slot)?.take())
}
