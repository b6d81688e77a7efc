//! Service-level error taxonomy.

use runkit_batch::BatchError;
use runkit_cache::CacheError;
use runkit_primitives::Error as InputError;
use runkit_ratelimit::RateLimitError;
use runkit_retry::RetryError;
use thiserror::Error;

use crate::lifecycle::LifecycleError;
use crate::operations::OperationName;

/// Errors returned by [`UtilityService`](crate::UtilityService).
///
/// Expected negative outcomes (cache miss, exhausted retries, rate limited)
/// are successful results, never one of these.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// An argument was out of range or otherwise rejected; nothing was mutated.
    #[error(transparent)]
    InvalidInput(#[from] InputError),
    /// The argument object of a named operation did not match its contract.
    #[error("malformed arguments for `{operation}`: {source}")]
    MalformedArguments {
        /// Operation whose arguments were rejected.
        operation: OperationName,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },
    /// No operation is registered under the requested name.
    #[error("unknown operation `{name}`")]
    UnknownOperation {
        /// Requested name.
        name: String,
    },
    /// Retry bookkeeping was reported for an id in an incompatible state.
    #[error("{0}")]
    Conflict(String),
    /// The configuration handed to the service was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The service has been shut down.
    #[error("service has been shut down")]
    ShutDown,
    /// Unexpected fault inside the service.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable code for the error category.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) | Self::MalformedArguments { .. } => "invalid_input",
            Self::UnknownOperation { .. } => "unknown_operation",
            Self::Conflict(_) => "conflict",
            Self::InvalidConfig(_) => "invalid_config",
            Self::ShutDown => "shut_down",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns `true` for faults inside the service rather than the caller.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidInput(input) => Self::InvalidInput(input),
            CacheError::Poisoned => Self::Internal(err.to_string()),
        }
    }
}

impl From<RetryError> for ServiceError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::InvalidInput(input) => Self::InvalidInput(input),
            RetryError::UnknownOperation { .. } | RetryError::InvalidTransition { .. } => {
                Self::Conflict(err.to_string())
            }
            RetryError::Poisoned => Self::Internal(err.to_string()),
        }
    }
}

impl From<RateLimitError> for ServiceError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::InvalidInput(input) => Self::InvalidInput(input),
            RateLimitError::Poisoned => Self::Internal(err.to_string()),
        }
    }
}

impl From<BatchError> for ServiceError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::InvalidInput(input) => Self::InvalidInput(input),
            BatchError::DuplicateId { id } => Self::InvalidInput(InputError::invalid(
                "operations",
                format!("duplicate operation id `{id}`"),
            )),
            BatchError::CacheUnavailable => Self::Internal(err.to_string()),
        }
    }
}

impl From<LifecycleError> for ServiceError {
    fn from(err: LifecycleError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_errors_map_to_categories() {
        let input = InputError::invalid("key", "must not be empty");
        assert_eq!(ServiceError::from(CacheError::InvalidInput(input)).code(), "invalid_input");
        assert!(ServiceError::from(CacheError::Poisoned).is_internal());
        assert!(ServiceError::from(RateLimitError::Poisoned).is_internal());
        assert_eq!(
            ServiceError::from(RetryError::UnknownOperation {
                operation_id: "op".into()
            })
            .code(),
            "conflict"
        );
        let duplicate = ServiceError::from(BatchError::DuplicateId { id: "a".into() });
        assert_eq!(duplicate.code(), "invalid_input");
        assert!(duplicate.to_string().contains("duplicate operation id `a`"));
    }
}
