//! Retry bookkeeping for caller-executed operations.
//!
//! The tracker never runs anything itself. Each [`RetryTracker::check`] answers
//! whether the caller may attempt the operation now, must wait, or has run out
//! of attempts; the caller performs the work and reports back.

#![warn(missing_docs, clippy::pedantic)]

mod policy;
mod state;
mod tracker;

pub use policy::{
    DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_RETRIES, MAX_INITIAL_DELAY_MS, MAX_RETRIES_LIMIT,
    MIN_INITIAL_DELAY_MS, MIN_RETRIES, RetryPolicy,
};
pub use state::{RetryPhase, RetrySnapshot};
pub use tracker::{
    DEFAULT_GC_HORIZON, RetryDecision, RetryError, RetryResult, RetryStatus, RetryTracker,
};
