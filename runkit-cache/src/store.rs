//! In-memory entry store keyed by `(namespace, key)`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use runkit_primitives::{
    Clock, SystemClock, Timestamp, ensure_in_range, ensure_not_empty, seconds_until,
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{CacheError, CacheResult};

/// Namespace used when callers do not supply one.
pub const DEFAULT_NAMESPACE: &str = "default";
/// Smallest accepted time-to-live, in seconds.
pub const MIN_TTL_SECS: u64 = 1;
/// Largest accepted time-to-live, in seconds.
pub const MAX_TTL_SECS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    namespace: String,
    key: String,
}

impl CacheKey {
    fn new(namespace: &str, key: &str) -> CacheResult<Self> {
        ensure_not_empty("namespace", namespace)?;
        ensure_not_empty("key", key)?;
        Ok(Self {
            namespace: namespace.to_owned(),
            key: key.to_owned(),
        })
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Timestamp,
}

impl CacheEntry {
    fn is_live(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
    expired_evictions: u64,
    sweeps: u64,
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheLookup {
    /// Whether a live entry was present.
    pub found: bool,
    /// Stored value when found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Seconds until the entry expires, rounded up, when found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<u64>,
}

impl CacheLookup {
    fn miss() -> Self {
        Self {
            found: false,
            value: None,
            expires_in_seconds: None,
        }
    }
}

/// Outcome of a cache write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePut {
    /// Always `true`; failures are reported as errors.
    pub success: bool,
    /// Instant after which the entry is no longer visible.
    pub expires_at: Timestamp,
}

/// Outcome of a cache delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDelete {
    /// Always `true`; failures are reported as errors.
    pub success: bool,
    /// Whether an entry (live or not yet swept) was removed.
    pub existed: bool,
}

/// Outcome of a cache clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheClear {
    /// Always `true`; failures are reported as errors.
    pub success: bool,
    /// Number of entries removed.
    pub cleared_entries: usize,
}

/// Snapshot describing cache utilisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Entries currently stored, including expired ones not yet reclaimed.
    pub entries: usize,
    /// Reads that returned a live entry.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Expired entries removed by reads or sweeps.
    pub expired_evictions: u64,
    /// Completed sweep passes.
    pub sweeps: u64,
}

/// Namespaced TTL cache shared by direct callers and the batch runner.
pub struct TtlCache {
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner>,
}

impl fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.inner.lock().map(|inner| inner.entries.len()).ok();
        f.debug_struct("TtlCache")
            .field("entries", &entries)
            .finish_non_exhaustive()
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl TtlCache {
    /// Creates an empty cache reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, CacheInner>> {
        self.inner.lock().map_err(|_| CacheError::Poisoned)
    }

    /// Reads a live entry.
    ///
    /// An expired entry is removed as part of the read and reported as a miss.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidInput`] for empty keys or namespaces and
    /// [`CacheError::Poisoned`] if the store lock is poisoned.
    pub fn get(&self, key: &str, namespace: &str) -> CacheResult<CacheLookup> {
        let cache_key = CacheKey::new(namespace, key)?;
        let now = self.clock.now();
        let mut inner = self.lock()?;

        let probe = inner
            .entries
            .get(&cache_key)
            .map(|entry| entry.is_live(now).then(|| entry.clone()));
        let live = match probe {
            None => None,
            Some(Some(entry)) => Some(entry),
            Some(None) => {
                inner.entries.remove(&cache_key);
                inner.expired_evictions += 1;
                debug!(namespace, key, "expired cache entry removed on read");
                None
            }
        };

        let Some(entry) = live else {
            inner.misses += 1;
            return Ok(CacheLookup::miss());
        };

        inner.hits += 1;
        Ok(CacheLookup {
            found: true,
            value: Some(entry.value),
            expires_in_seconds: Some(seconds_until(now, entry.expires_at)),
        })
    }

    /// Stores `value`, replacing any existing entry unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidInput`] when `ttl_seconds` lies outside
    /// [`MIN_TTL_SECS`]`..=`[`MAX_TTL_SECS`] (the value is never clamped) or
    /// the key is empty, and [`CacheError::Poisoned`] on lock poisoning.
    pub fn put(
        &self,
        key: &str,
        value: Value,
        ttl_seconds: u64,
        namespace: &str,
    ) -> CacheResult<CachePut> {
        let ttl_seconds = ensure_in_range("ttlSeconds", ttl_seconds, MIN_TTL_SECS, MAX_TTL_SECS)?;
        let cache_key = CacheKey::new(namespace, key)?;
        // Bounded by MAX_TTL_SECS, so the cast cannot wrap.
        #[allow(clippy::cast_possible_wrap)]
        let expires_at = self.clock.now() + Duration::seconds(ttl_seconds as i64);

        let mut inner = self.lock()?;
        inner.entries.insert(cache_key, CacheEntry { value, expires_at });
        debug!(namespace, key, ttl_seconds, "cache entry stored");

        Ok(CachePut {
            success: true,
            expires_at,
        })
    }

    /// Removes an entry regardless of whether it has expired.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidInput`] for empty keys and
    /// [`CacheError::Poisoned`] on lock poisoning.
    pub fn delete(&self, key: &str, namespace: &str) -> CacheResult<CacheDelete> {
        let cache_key = CacheKey::new(namespace, key)?;
        let existed = self.lock()?.entries.remove(&cache_key).is_some();
        Ok(CacheDelete {
            success: true,
            existed,
        })
    }

    /// Removes every entry of `namespace`, or every entry when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Poisoned`] on lock poisoning.
    pub fn clear(&self, namespace: Option<&str>) -> CacheResult<CacheClear> {
        let mut inner = self.lock()?;
        let before = inner.entries.len();
        match namespace {
            Some(namespace) => inner.entries.retain(|k, _| k.namespace != namespace),
            None => inner.entries.clear(),
        }
        let cleared_entries = before - inner.entries.len();
        debug!(?namespace, cleared_entries, "cache cleared");

        Ok(CacheClear {
            success: true,
            cleared_entries,
        })
    }

    /// Removes every entry whose expiry is at or before the current time.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Poisoned`] on lock poisoning.
    pub fn sweep_expired(&self) -> CacheResult<usize> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_live(now));
        let removed = before - inner.entries.len();
        inner.expired_evictions += removed as u64;
        inner.sweeps += 1;
        Ok(removed)
    }

    /// Returns utilisation counters.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Poisoned`] on lock poisoning.
    pub fn stats(&self) -> CacheResult<CacheStats> {
        let inner = self.lock()?;
        Ok(CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            expired_evictions: inner.expired_evictions,
            sweeps: inner.sweeps,
        })
    }
}
