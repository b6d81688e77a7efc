//! In-process utility primitives: a TTL cache, a retry/backoff tracker, a
//! concurrency-bounded batch runner and a fixed-window rate limiter.
//!
//! Depend on this crate via `cargo add runkit`. It bundles the component
//! crates behind feature flags so downstream users can enable only what they
//! need. The `kernel` feature adds [`kernel::UtilityService`], which owns one
//! instance of every primitive and exposes them as named JSON operations.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use runkit_primitives as primitives;

/// Service kernel and named-operation dispatch (enabled by `kernel` feature).
#[cfg(feature = "kernel")]
pub use runkit_kernel as kernel;

/// TTL cache and sweeper (enabled by `cache` feature).
#[cfg(feature = "cache")]
pub use runkit_cache as cache;

/// Retry/backoff tracker (enabled by `retry` feature).
#[cfg(feature = "retry")]
pub use runkit_retry as retry;

/// Bounded-concurrency batch runner (enabled by `batch` feature).
#[cfg(feature = "batch")]
pub use runkit_batch as batch;

/// Fixed-window rate limiter (enabled by `ratelimit` feature).
#[cfg(feature = "ratelimit")]
pub use runkit_ratelimit as ratelimit;

/// Tracing subscriber setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use runkit_telemetry as telemetry;

/// Configuration management (enabled by `config` feature).
#[cfg(feature = "config")]
pub use runkit_config as config;
