//! Error types for the cache.

use thiserror::Error;

/// Errors emitted by cache operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A caller-supplied argument was rejected; the store was not touched.
    #[error(transparent)]
    InvalidInput(#[from] runkit_primitives::Error),
    /// The entry map lock was poisoned by a panicking writer.
    #[error("cache store lock poisoned")]
    Poisoned,
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
