//! Shared error definitions for argument validation.

use thiserror::Error;

/// Result alias used throughout the toolkit.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised when caller-supplied arguments are rejected.
///
/// Every variant describes malformed input; no state is mutated when one of
/// these is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Numeric argument fell outside its permitted range.
    #[error("`{field}` must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Argument name as exposed to callers.
        field: &'static str,
        /// Rejected value.
        value: i128,
        /// Inclusive lower bound.
        min: i128,
        /// Inclusive upper bound.
        max: i128,
    },

    /// Argument failed a non-numeric validation rule.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Argument name as exposed to callers.
        field: &'static str,
        /// Human-readable reason for rejection.
        reason: String,
    },
}

impl Error {
    /// Helper to construct [`Error::Invalid`] from string-like reasons.
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
