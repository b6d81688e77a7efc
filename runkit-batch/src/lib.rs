//! Bounded-concurrency execution of a static list of operations.
//!
//! The runner owns scheduling, ordering, timeouts, and optional result
//! caching. Performing an operation is delegated to an injected
//! [`OperationExecutor`]; [`SimulatedExecutor`] fabricates results for callers
//! that only need the scheduling behaviour.

#![warn(missing_docs, clippy::pedantic)]

pub mod executor;
pub mod operation;
pub mod runner;

pub use executor::{
    ExecutorError, ExecutorRegistry, ExecutorResult, OperationExecutor, SimulatedExecutor,
};
pub use operation::{
    BatchOperation, BatchOptions, BatchReport, BatchResult, DEFAULT_CACHE_TTL_SECS,
    DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT_MS, MAX_CONCURRENCY, MAX_OPERATIONS, MAX_TIMEOUT_MS,
    MIN_TIMEOUT_MS,
};
pub use runner::{BatchError, BatchRunResult, BatchRunner};
