//! Core shared types for the runkit utility primitives.

#![warn(missing_docs, clippy::pedantic)]

mod clock;
mod error;
mod ids;
mod validate;

/// Clock abstraction used by every time-dependent store.
pub use clock::{Clock, ManualClock, SystemClock, Timestamp, elapsed_millis, seconds_until};
/// Error type and result alias shared across the toolkit.
pub use error::{Error, Result};
/// Identifier used to correlate a single batch run in logs.
pub use ids::RunId;
/// Argument validation helpers.
pub use validate::{ensure_in_range, ensure_not_empty};
