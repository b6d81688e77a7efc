//! Fixed-window rate limiting keyed by resource name.
//!
//! Each resource owns exactly one live window. The window resets wholesale
//! once its reset instant passes, so up to twice the limit can be admitted
//! across a window boundary. State per resource is constant size.

#![warn(missing_docs, clippy::pedantic)]

mod decision;
mod limiter;

pub use decision::RateLimitDecision;
pub use limiter::{
    DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS, MAX_WINDOW_SECS, RateLimitError, RateLimitResult,
    RateLimiter, WindowSpec,
};
