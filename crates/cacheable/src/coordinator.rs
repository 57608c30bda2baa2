//! Read-through caching over a single backend.
//!
//! ## Failure Policy
//!
//! - **Reads fail open**: a backend error on lookup is logged and treated as
//!   a miss, so the caller recomputes.
//! - **Writes fail closed**: a failed `set`, `delete` or `delete_all` is
//!   returned to the caller. A dropped invalidation could serve stale data
//!   indefinitely, so it is never reported as success.
//!
//! ## Entry Lifecycle
//!
//! ```text
//! absent ──store(ttl)──▶ present(ttl-bound) ──expiry / invalidate──▶ absent
//! absent ──store(None)─▶ present(unbounded) ──invalidate──────────▶ absent
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::CacheBackend;
use crate::error::{CacheError, Result};
use crate::key::CacheKey;

/// A cache that can be read through and invalidated.
///
/// Implemented by [`CacheCoordinator`] (one backend) and
/// [`TieredCache`](crate::TieredCache) (fast + slow backends). The
/// annotation layer binds instances to an `Arc<dyn CacheLayer>`.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Fetch a stored payload. Backend failures are treated as a miss.
    async fn lookup(&self, key: &CacheKey) -> Option<Arc<Vec<u8>>>;

    /// Store a payload. `None` TTL never expires.
    async fn store(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Delete exactly `key`.
    async fn invalidate(&self, key: &CacheKey) -> Result<()>;

    /// Delete every key starting with `prefix`. Returns the number of keys found.
    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize>;

    /// Clear everything this layer owns.
    async fn invalidate_all(&self) -> Result<()>;

    fn stats(&self) -> CacheStats;
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing (including fail-open errors).
    pub misses: u64,
    /// Slow-tier hits copied into the fast tier.
    pub promotions: u64,
    /// Backend errors seen on any path.
    pub backend_errors: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    backend_errors: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Pass a result through, counting it if it failed.
    pub(crate) fn track<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.backend_error();
        }
        result
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
        }
    }
}

/// Orchestrates reads, writes and invalidations against one backend.
pub struct CacheCoordinator {
    backend: Arc<dyn CacheBackend>,
    stats: StatsRecorder,
}

impl CacheCoordinator {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            stats: StatsRecorder::default(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// See [`read_through`].
    pub async fn read_through<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        compute: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        read_through(self, key, ttl, compute).await
    }
}

#[async_trait]
impl CacheLayer for CacheCoordinator {
    async fn lookup(&self, key: &CacheKey) -> Option<Arc<Vec<u8>>> {
        match self.backend.get(key.as_str()).await {
            Ok(Some(data)) => {
                tracing::debug!(key = %key, backend = self.backend.name(), "cache hit");
                self.stats.hit();
                Some(data)
            }
            Ok(None) => {
                tracing::debug!(key = %key, backend = self.backend.name(), "cache miss");
                self.stats.miss();
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, treating as miss");
                self.stats.backend_error();
                self.stats.miss();
                None
            }
        }
    }

    async fn store(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.stats
            .track(self.backend.set(key.as_str(), value, ttl).await)
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        self.stats.track(self.backend.delete(key.as_str()).await)?;
        tracing::debug!(key = %key, backend = self.backend.name(), "cache invalidated");
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.stats.track(self.backend.keys(prefix).await)?;
        for key in &keys {
            self.stats.track(self.backend.delete(key).await)?;
        }
        tracing::debug!(prefix, removed = keys.len(), "cache prefix invalidated");
        Ok(keys.len())
    }

    async fn invalidate_all(&self) -> Result<()> {
        self.stats.track(self.backend.delete_all().await)?;
        tracing::debug!(backend = self.backend.name(), "cache cleared");
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

/// Return the cached value for `key`, or run `compute` once and cache it.
///
/// - A hit never runs `compute`.
/// - A miss runs `compute` exactly once; its value is stored with `ttl`
///   only after it completes. If the caller is cancelled mid-compute,
///   nothing is stored.
/// - `compute` errors are returned unchanged and nothing is stored.
/// - A `Some(Duration::ZERO)` TTL returns the value without storing it.
/// - A payload that no longer decodes as `T` is deleted and recomputed.
/// - Every successful result is stored, including `None` for `Option<T>`
///   values; return an error from `compute` to leave a miss uncached.
///
/// Concurrent misses on the same key each run `compute`; the last write wins.
pub async fn read_through<L, T, E, F, Fut>(
    layer: &L,
    key: &CacheKey,
    ttl: Option<Duration>,
    compute: F,
) -> std::result::Result<T, E>
where
    L: CacheLayer + ?Sized,
    T: Serialize + DeserializeOwned,
    E: From<CacheError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    if let Some(data) = layer.lookup(key).await {
        match decode::<T>(&data) {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to decode cached value");
                if let Err(e) = layer.invalidate(key).await {
                    tracing::warn!(key = %key, error = %e, "Failed to drop undecodable entry");
                }
            }
        }
    }

    let value = compute().await?;

    if ttl == Some(Duration::ZERO) {
        return Ok(value);
    }
    let payload = encode(&value)?;
    layer.store(key, payload, ttl).await?;
    tracing::debug!(key = %key, ttl = ?ttl, "cache populated");
    Ok(value)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| CacheError::codec(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    rmp_serde::from_slice(data).map_err(|e| CacheError::codec(e.to_string()))
}
