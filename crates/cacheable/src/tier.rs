//! Two-tier cache composition.
//!
//! ## Cache Hierarchy
//!
//! ```text
//! lookup → fast tier ──hit──▶ return
//!              │ miss
//!              ▼
//!          slow tier ──hit──▶ copy into fast tier (fast TTL) → return
//!              │ miss
//!              ▼
//!          compute → slow tier (call TTL) → fast tier (fast TTL) → return
//! ```
//!
//! ## Invalidation Order
//!
//! Deletes go to the slow tier first, then the fast tier. A reader that
//! misses the fast tier after the slow delete finds nothing to promote, so
//! a stale value cannot be re-promoted once both deletes have landed. The
//! residual window: between the two deletes, readers can still be served
//! the old value from the fast tier, and a reader that fetched from the slow
//! tier *before* the slow delete may write it into the fast tier after the
//! fast delete; that copy lives at most one fast-tier TTL.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::CacheBackend;
use crate::coordinator::{CacheLayer, CacheStats, StatsRecorder, read_through};
use crate::error::{CacheError, Result};
use crate::key::CacheKey;

/// Fast tier backed by a slower shared tier.
pub struct TieredCache {
    fast: Arc<dyn CacheBackend>,
    slow: Arc<dyn CacheBackend>,
    fast_ttl: Option<Duration>,
    stats: StatsRecorder,
}

impl TieredCache {
    /// Compose `fast` over `slow`. Entries copied into the fast tier expire
    /// after `fast_ttl` (`None` keeps them until invalidated).
    pub fn new(
        fast: Arc<dyn CacheBackend>,
        slow: Arc<dyn CacheBackend>,
        fast_ttl: Option<Duration>,
    ) -> Self {
        Self {
            fast,
            slow,
            fast_ttl,
            stats: StatsRecorder::default(),
        }
    }

    pub fn fast(&self) -> &Arc<dyn CacheBackend> {
        &self.fast
    }

    pub fn slow(&self) -> &Arc<dyn CacheBackend> {
        &self.slow
    }

    pub fn fast_ttl(&self) -> Option<Duration> {
        self.fast_ttl
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

    /// Fast-tier TTL for a freshly computed value: never longer than the
    /// call's own TTL.
    fn fast_ttl_for(&self, ttl: Option<Duration>) -> Option<Duration> {
        match (self.fast_ttl, ttl) {
            (Some(fast), Some(call)) => Some(fast.min(call)),
            (Some(fast), None) => Some(fast),
            (None, call) => call,
        }
    }

    async fn tier_get(&self, tier: &dyn CacheBackend, key: &CacheKey) -> Option<Arc<Vec<u8>>> {
        match tier.get(key.as_str()).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(key = %key, tier = tier.name(), error = %e, "tier read failed, treating as miss");
                self.stats.backend_error();
                None
            }
        }
    }
}

#[async_trait]
impl CacheLayer for TieredCache {
    async fn lookup(&self, key: &CacheKey) -> Option<Arc<Vec<u8>>> {
        if let Some(data) = self.tier_get(self.fast.as_ref(), key).await {
            tracing::debug!(key = %key, "cache hit (fast)");
            self.stats.hit();
            return Some(data);
        }

        let Some(data) = self.tier_get(self.slow.as_ref(), key).await else {
            tracing::debug!(key = %key, "cache miss");
            self.stats.miss();
            return None;
        };

        tracing::debug!(key = %key, "cache hit (slow)");
        self.stats.hit();

        // Promotion is best effort: the slow tier still holds the value.
        match self
            .fast
            .set(key.as_str(), data.to_vec(), self.fast_ttl)
            .await
        {
            Ok(()) => self.stats.promotion(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to promote entry to fast tier");
                self.stats.backend_error();
            }
        }
        Some(data)
    }

    async fn store(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.stats
            .track(self.slow.set(key.as_str(), value.clone(), ttl).await)?;
        self.stats.track(
            self.fast
                .set(key.as_str(), value, self.fast_ttl_for(ttl))
                .await,
        )
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let slow = self.stats.track(self.slow.delete(key.as_str()).await);
        let fast = self.stats.track(self.fast.delete(key.as_str()).await);
        slow.and(fast)?;
        tracing::debug!(key = %key, "cache invalidated (slow+fast)");
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
        let mut removed = 0;
        for tier in [&self.slow, &self.fast] {
            let keys = self.stats.track(tier.keys(prefix).await)?;
            for key in &keys {
                self.stats.track(tier.delete(key).await)?;
            }
            removed = removed.max(keys.len());
        }
        tracing::debug!(prefix, removed, "cache prefix invalidated (slow+fast)");
        Ok(removed)
    }

    async fn invalidate_all(&self) -> Result<()> {
        let slow = self.stats.track(self.slow.delete_all().await);
        let fast = self.stats.track(self.fast.delete_all().await);
        slow.and(fast)?;
        tracing::debug!("cache cleared (slow+fast)");
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
