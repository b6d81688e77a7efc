//! Batch inputs, options, and per-item results.

use runkit_cache::{MAX_TTL_SECS, MIN_TTL_SECS};
use runkit_primitives::{Error as InputError, ensure_in_range};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Most operations accepted in one batch.
pub const MAX_OPERATIONS: usize = 100;
/// Default in-flight limit.
pub const DEFAULT_CONCURRENCY: u32 = 5;
/// Largest accepted in-flight limit.
pub const MAX_CONCURRENCY: u32 = 20;
/// Default per-operation timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Shortest accepted per-operation timeout.
pub const MIN_TIMEOUT_MS: u64 = 1_000;
/// Longest accepted per-operation timeout.
pub const MAX_TIMEOUT_MS: u64 = 300_000;
/// Default lifetime of cached operation results.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Caller-supplied unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    /// Identifier unique within one batch.
    pub id: String,
    /// Kind of work; selects the executor and the cache namespace.
    #[serde(rename = "type")]
    pub op_type: String,
    /// Opaque payload handed to the executor. Required on the wire, though
    /// it may be `null`.
    pub data: Value,
}

impl BatchOperation {
    /// Creates an operation.
    #[must_use]
    pub fn new(id: impl Into<String>, op_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            op_type: op_type.into(),
            data,
        }
    }

    pub(crate) fn cache_namespace(&self) -> String {
        format!("batch.{}", self.op_type)
    }

    pub(crate) fn cache_key(&self) -> String {
        self.data.to_string()
    }
}

/// Scheduling options for one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchOptions {
    /// Maximum operations in flight at once.
    pub concurrency: u32,
    /// Per-operation timeout in milliseconds.
    pub timeout_ms: u64,
    /// Keep starting operations after a failure.
    pub continue_on_error: bool,
    /// Consult and populate the shared cache.
    pub use_cache: bool,
    /// Lifetime of cached results.
    pub cache_ttl_seconds: u64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            continue_on_error: true,
            use_cache: false,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl BatchOptions {
    /// Sets the in-flight limit.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the per-operation timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets whether a failure stops new operations from starting.
    #[must_use]
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Enables result caching with the supplied lifetime.
    #[must_use]
    pub fn with_cache(mut self, cache_ttl_seconds: u64) -> Self {
        self.use_cache = true;
        self.cache_ttl_seconds = cache_ttl_seconds;
        self
    }

    /// Validates every option against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::OutOfRange`] naming the first offending option.
    pub fn validate(&self) -> Result<(), InputError> {
        ensure_in_range("concurrency", self.concurrency, 1, MAX_CONCURRENCY)?;
        ensure_in_range("timeoutMs", self.timeout_ms, MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)?;
        ensure_in_range(
            "cacheTtlSeconds",
            self.cache_ttl_seconds,
            MIN_TTL_SECS,
            MAX_TTL_SECS,
        )?;
        Ok(())
    }
}

/// Outcome of one operation, reported at the operation's input position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// Identifier of the originating operation.
    pub id: String,
    /// Whether the operation produced a result.
    pub success: bool,
    /// Executor output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Result was served from the cache without executing.
    pub cached: bool,
    /// Operation was never started because the batch stopped early.
    pub skipped: bool,
    /// Wall time spent executing, zero for cached and skipped results.
    pub duration_ms: u64,
}

impl BatchResult {
    pub(crate) fn succeeded(id: String, value: Value, duration_ms: u64) -> Self {
        Self {
            id,
            success: true,
            result: Some(value),
            error: None,
            cached: false,
            skipped: false,
            duration_ms,
        }
    }

    pub(crate) fn from_cache(id: String, value: Value) -> Self {
        Self {
            cached: true,
            ..Self::succeeded(id, value, 0)
        }
    }

    pub(crate) fn failed(id: String, error: String, duration_ms: u64) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error),
            cached: false,
            skipped: false,
            duration_ms,
        }
    }

    pub(crate) fn not_started(id: String) -> Self {
        Self {
            skipped: true,
            ..Self::failed(
                id,
                "not started: batch stopped after an earlier failure".to_owned(),
                0,
            )
        }
    }
}

/// Aggregate outcome of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Operations submitted.
    pub total: usize,
    /// Operations that succeeded, cached hits included.
    pub successful: usize,
    /// Operations that started and failed or timed out.
    pub failed: usize,
    /// Operations never started.
    pub skipped: usize,
    /// One result per operation, in input order.
    pub results: Vec<BatchResult>,
}

impl BatchReport {
    pub(crate) fn from_results(results: Vec<BatchResult>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        let skipped = results.iter().filter(|r| r.skipped).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful - skipped,
            skipped,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_deserialize_with_defaults() {
        let options: BatchOptions =
            serde_json::from_value(json!({"concurrency": 2, "useCache": true})).unwrap();
        assert_eq!(options.concurrency, 2);
        assert!(options.use_cache);
        assert_eq!(options.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(options.continue_on_error);
    }

    #[test]
    fn options_reject_out_of_range_values() {
        assert!(BatchOptions::default().validate().is_ok());
        assert!(BatchOptions::default().with_concurrency(0).validate().is_err());
        assert!(BatchOptions::default().with_concurrency(21).validate().is_err());
        assert!(BatchOptions::default().with_timeout_ms(999).validate().is_err());
        assert!(BatchOptions::default().with_timeout_ms(300_001).validate().is_err());
        assert!(BatchOptions::default().with_cache(0).validate().is_err());
    }

    #[test]
    fn operation_uses_type_field_on_the_wire() {
        let op: BatchOperation =
            serde_json::from_value(json!({"id": "a", "type": "fetch", "data": {"n": 1}})).unwrap();
        assert_eq!(op.op_type, "fetch");
        assert_eq!(op.cache_namespace(), "batch.fetch");
        assert_eq!(op.cache_key(), r#"{"n":1}"#);
    }

    #[test]
    fn operation_requires_data_field() {
        let missing = serde_json::from_value::<BatchOperation>(json!({"id": "a", "type": "fetch"}));
        assert!(missing.is_err());

        let null: BatchOperation =
            serde_json::from_value(json!({"id": "a", "type": "fetch", "data": null})).unwrap();
        assert_eq!(null.data, Value::Null);
    }

    #[test]
    fn report_counts_partition_total() {
        let report = BatchReport::from_results(vec![
            BatchResult::succeeded("a".into(), json!(1), 3),
            BatchResult::from_cache("b".into(), json!(2)),
            BatchResult::failed("c".into(), "boom".into(), 1),
            BatchResult::not_started("d".into()),
        ]);
        assert_eq!(report.total, 4);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
    }
}
