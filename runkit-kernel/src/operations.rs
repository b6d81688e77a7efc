//! Named operations and their JSON argument contracts.

use std::fmt;
use std::str::FromStr;

use runkit_batch::BatchOperation;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{ServiceError, ServiceResult};

/// Operations reachable through [`UtilityService::call`](crate::UtilityService::call).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationName {
    /// Read a cache entry.
    CacheGet,
    /// Store a cache entry.
    CachePut,
    /// Remove a cache entry.
    CacheDelete,
    /// Remove every entry, or every entry of one namespace.
    CacheClear,
    /// Consult the retry tracker.
    RetryOperation,
    /// Run a batch of operations.
    BatchOperation,
    /// Consult the rate limiter.
    RateLimitCheck,
}

impl OperationName {
    /// Every operation, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::CacheGet,
        Self::CachePut,
        Self::CacheDelete,
        Self::CacheClear,
        Self::RetryOperation,
        Self::BatchOperation,
        Self::RateLimitCheck,
    ];

    /// Wire name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CacheGet => "cache_get",
            Self::CachePut => "cache_put",
            Self::CacheDelete => "cache_delete",
            Self::CacheClear => "cache_clear",
            Self::RetryOperation => "retry_operation",
            Self::BatchOperation => "batch_operation",
            Self::RateLimitCheck => "rate_limit_check",
        }
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationName {
    type Err = ServiceError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|operation| operation.as_str() == name)
            .ok_or_else(|| ServiceError::UnknownOperation {
                name: name.to_owned(),
            })
    }
}

/// Decodes the argument object of `operation`. A `null` argument is read
/// as an empty object.
pub(crate) fn decode_args<T: DeserializeOwned>(
    operation: OperationName,
    args: Value,
) -> ServiceResult<T> {
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args)
        .map_err(|source| ServiceError::MalformedArguments { operation, source })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CacheGetArgs {
    pub key: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CachePutArgs {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CacheDeleteArgs {
    pub key: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CacheClearArgs {
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RetryArgs {
    pub operation_id: String,
    pub operation_type: String,
    pub operation_data: Value,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub initial_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub should_execute: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct BatchArgs {
    pub operations: Vec<BatchOperation>,
    #[serde(default)]
    pub concurrency: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub cache_ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RateLimitArgs {
    pub resource: String,
    #[serde(default)]
    pub max_requests: Option<u64>,
    #[serde(default)]
    pub window_seconds: Option<u64>,
    #[serde(default = "default_true")]
    pub increment: bool,
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_round_trip_through_from_str() {
        for operation in OperationName::ALL {
            assert_eq!(operation.as_str().parse::<OperationName>().unwrap(), operation);
        }
        let err = "cache_fetch".parse::<OperationName>().unwrap_err();
        assert_eq!(err.code(), "unknown_operation");
    }

    #[test]
    fn optional_arguments_take_defaults() {
        let args: RateLimitArgs =
            decode_args(OperationName::RateLimitCheck, json!({"resource": "api"})).unwrap();
        assert!(args.increment);
        assert_eq!(args.max_requests, None);

        let args: CacheClearArgs = decode_args(OperationName::CacheClear, Value::Null).unwrap();
        assert!(args.namespace.is_none());
    }

    #[test]
    fn missing_or_unknown_fields_are_malformed() {
        let err = decode_args::<CacheGetArgs>(OperationName::CacheGet, json!({})).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::MalformedArguments {
                operation: OperationName::CacheGet,
                ..
            }
        ));

        let err = decode_args::<CacheGetArgs>(
            OperationName::CacheGet,
            json!({"key": "k", "ttl": 5}),
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }
}
