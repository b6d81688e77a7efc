//! Namespaced key-value cache with time-to-live expiry.
//!
//! Entries are visible only while the clock reads strictly before their
//! expiry. Reads check expiry themselves; the [`sweeper`] only reclaims memory
//! for entries nobody reads again.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod store;
pub mod sweeper;

pub use error::{CacheError, CacheResult};
pub use store::{
    CacheClear, CacheDelete, CacheLookup, CachePut, CacheStats, DEFAULT_NAMESPACE, MAX_TTL_SECS,
    MIN_TTL_SECS, TtlCache,
};
pub use sweeper::{SweeperHandle, spawn_sweeper};
