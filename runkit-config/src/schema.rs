//! Strongly typed configuration schema.

use std::time::Duration;

use anyhow::{Result, bail};
use runkit_primitives::ensure_in_range;
use runkit_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration for a runkit service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// TTL cache settings.
    pub cache: CacheSettings,
    /// Retry tracker settings.
    pub retry: RetrySettings,
    /// Batch runner defaults.
    pub batch: BatchSettings,
    /// Rate limiter defaults.
    pub rate_limit: RateLimitSettings,
    /// Log output settings.
    pub telemetry: TelemetryConfig,
    /// Period of the retry/rate-limit housekeeping task.
    pub maintenance_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            retry: RetrySettings::default(),
            batch: BatchSettings::default(),
            rate_limit: RateLimitSettings::default(),
            telemetry: TelemetryConfig::default(),
            maintenance_interval_secs: 60,
        }
    }
}

impl RuntimeConfig {
    /// Returns the housekeeping period.
    #[must_use]
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.maintenance_interval_secs == 0 {
            bail!("maintenance_interval_secs must be greater than zero");
        }
        self.cache.validate()?;
        self.retry.validate()?;
        self.batch.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}

/// TTL cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// Period of the expired-entry sweep.
    pub sweep_interval_secs: u64,
    /// TTL applied when a put omits one.
    pub default_ttl_secs: u64,
    /// Namespace applied when a call omits one.
    pub default_namespace: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            default_ttl_secs: 300,
            default_namespace: "default".to_owned(),
        }
    }
}

impl CacheSettings {
    /// Returns the sweep period.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            bail!("cache.sweep_interval_secs must be greater than zero");
        }
        if self.default_namespace.is_empty() {
            bail!("cache.default_namespace must not be empty");
        }
        ensure_in_range("cache.default_ttl_secs", self.default_ttl_secs, 1, 86_400)?;
        Ok(())
    }
}

/// Retry tracker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    /// Attempt budget applied when a check omits one.
    pub default_max_retries: u32,
    /// Base delay applied when a check omits one.
    pub default_initial_delay_ms: u64,
    /// Optional cap on every computed backoff delay.
    pub max_delay_ms: Option<u64>,
    /// Age after which retry state is collected.
    pub gc_horizon_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            default_initial_delay_ms: 1_000,
            max_delay_ms: None,
            gc_horizon_secs: 3_600,
        }
    }
}

impl RetrySettings {
    /// Returns the collection horizon.
    #[must_use]
    pub const fn gc_horizon(&self) -> Duration {
        Duration::from_secs(self.gc_horizon_secs)
    }

    fn validate(&self) -> Result<()> {
        ensure_in_range("retry.default_max_retries", self.default_max_retries, 1, 10)?;
        ensure_in_range(
            "retry.default_initial_delay_ms",
            self.default_initial_delay_ms,
            100,
            60_000,
        )?;
        if self.gc_horizon_secs == 0 {
            bail!("retry.gc_horizon_secs must be greater than zero");
        }
        if let Some(cap) = self.max_delay_ms {
            if cap < self.default_initial_delay_ms {
                bail!("retry.max_delay_ms cannot be lower than retry.default_initial_delay_ms");
            }
        }
        Ok(())
    }
}

/// Batch runner defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchSettings {
    /// In-flight limit applied when a call omits one.
    pub default_concurrency: u32,
    /// Per-operation timeout applied when a call omits one.
    pub default_timeout_ms: u64,
    /// Cached result lifetime applied when a call omits one.
    pub default_cache_ttl_secs: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            default_concurrency: 5,
            default_timeout_ms: 30_000,
            default_cache_ttl_secs: 300,
        }
    }
}

impl BatchSettings {
    fn validate(&self) -> Result<()> {
        ensure_in_range("batch.default_concurrency", self.default_concurrency, 1, 20)?;
        ensure_in_range(
            "batch.default_timeout_ms",
            self.default_timeout_ms,
            1_000,
            300_000,
        )?;
        ensure_in_range(
            "batch.default_cache_ttl_secs",
            self.default_cache_ttl_secs,
            1,
            86_400,
        )?;
        Ok(())
    }
}

/// Rate limiter defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSettings {
    /// Admissions per window applied when a check omits one.
    pub default_max_requests: u64,
    /// Window length applied when a check omits one.
    pub default_window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default_max_requests: 60,
            default_window_secs: 60,
        }
    }
}

impl RateLimitSettings {
    fn validate(&self) -> Result<()> {
        if self.default_max_requests == 0 {
            bail!("rate_limit.default_max_requests must be greater than zero");
        }
        ensure_in_range(
            "rate_limit.default_window_secs",
            self.default_window_secs,
            1,
            86_400,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RuntimeConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let mut config = RuntimeConfig::default();
        config.cache.sweep_interval_secs = 0;
        assert!(config.validate().is_err());

        let config = RuntimeConfig {
            maintenance_interval_secs: 0,
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_defaults_are_rejected() {
        let mut config = RuntimeConfig::default();
        config.batch.default_concurrency = 21;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch.default_concurrency"));

        let mut config = RuntimeConfig::default();
        config.retry.max_delay_ms = Some(10);
        assert!(config.validate().is_err());
    }
}
