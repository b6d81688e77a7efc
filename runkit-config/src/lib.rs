//! Configuration management for the runkit service.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration. Environment overrides are applied after loading.

#![warn(missing_docs, clippy::pedantic)]

pub mod loader;
pub mod schema;

pub use runkit_telemetry::TelemetryConfig;
pub use schema::{BatchSettings, CacheSettings, RateLimitSettings, RetrySettings, RuntimeConfig};
