//! Configuration loading from JSON documents and the environment.

use std::env;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::debug;

use crate::RuntimeConfig;

/// Overrides the cache sweep period, in seconds.
pub const ENV_CACHE_SWEEP_INTERVAL_SECS: &str = "RUNKIT_CACHE_SWEEP_INTERVAL_SECS";
/// Overrides the retry delay cap, in milliseconds. `none` removes the cap.
pub const ENV_RETRY_MAX_DELAY_MS: &str = "RUNKIT_RETRY_MAX_DELAY_MS";
/// Overrides the log filter directive.
pub const ENV_LOG: &str = "RUNKIT_LOG";

impl RuntimeConfig {
    /// Parses a configuration from a JSON document. Missing fields take
    /// their defaults; unknown fields are rejected.
    ///
    /// # Errors
    ///
    /// Returns an error when the document is malformed or fails validation.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("failed to parse runtime config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses the JSON file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        debug!(path = %path.display(), "loaded runtime config");
        Self::from_json_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Applies `RUNKIT_*` environment overrides and revalidates.
    ///
    /// # Errors
    ///
    /// Returns an error when an override cannot be parsed or leaves the
    /// configuration invalid.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup(ENV_CACHE_SWEEP_INTERVAL_SECS) {
            self.cache.sweep_interval_secs = parse_var(ENV_CACHE_SWEEP_INTERVAL_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RETRY_MAX_DELAY_MS) {
            self.retry.max_delay_ms = if raw.trim().eq_ignore_ascii_case("none") {
                None
            } else {
                Some(parse_var(ENV_RETRY_MAX_DELAY_MS, &raw)?)
            };
        }
        if let Some(raw) = lookup(ENV_LOG) {
            self.telemetry.filter = raw;
        }
        self.validate()
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{name} must be a number, got {raw:?}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = RuntimeConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RuntimeConfig::from_json_str(
            r#"{"cache": {"sweep_interval_secs": 5}, "retry": {"max_delay_ms": 8000}}"#,
        )
        .unwrap();
        assert_eq!(config.cache.sweep_interval_secs, 5);
        assert_eq!(config.cache.default_ttl_secs, 300);
        assert_eq!(config.retry.max_delay_ms, Some(8_000));
        assert_eq!(config.batch.default_concurrency, 5);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(RuntimeConfig::from_json_str(r#"{"cache": {"ttl": 5}}"#).is_err());
        assert!(RuntimeConfig::from_json_str(r#"{"workers": 4}"#).is_err());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let err = RuntimeConfig::from_json_str(r#"{"rate_limit": {"default_window_secs": 0}}"#)
            .unwrap_err();
        assert!(format!("{err:#}").contains("rate_limit.default_window_secs"));
    }

    #[test]
    fn env_overrides_apply_and_validate() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_CACHE_SWEEP_INTERVAL_SECS, "15"),
            (ENV_RETRY_MAX_DELAY_MS, "20000"),
            (ENV_LOG, "runkit=debug"),
        ]);
        let mut config = RuntimeConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| (*v).to_owned()))
            .unwrap();
        assert_eq!(config.cache.sweep_interval_secs, 15);
        assert_eq!(config.retry.max_delay_ms, Some(20_000));
        assert_eq!(config.telemetry.filter, "runkit=debug");

        config
            .apply_overrides(|name| (name == ENV_RETRY_MAX_DELAY_MS).then(|| "none".to_owned()))
            .unwrap();
        assert_eq!(config.retry.max_delay_ms, None);
    }

    #[test]
    fn malformed_env_override_is_an_error() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_overrides(|name| (name == ENV_CACHE_SWEEP_INTERVAL_SECS).then(|| "soon".to_owned()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_CACHE_SWEEP_INTERVAL_SECS));
    }

    #[test]
    fn load_reads_json_files() {
        let path = std::env::temp_dir().join(format!("runkit-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"maintenance_interval_secs": 30}"#).unwrap();
        let config = RuntimeConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.maintenance_interval_secs, 30);

        assert!(RuntimeConfig::load(path).is_err());
    }
}
