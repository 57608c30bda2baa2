//! Storage backends behind a cache layer.
//!
//! A backend is a plain key/value store with optional per-entry TTL. It knows
//! nothing about methods or arguments; keys arrive fully derived.
//!
//! - [`MemoryBackend`]: in-process map behind one lock, lazy expiry
//! - [`RedisBackend`]: networked store reached through a connection pool

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryBackend;
pub use redis::{RedisBackend, RedisConfig};

/// Capability set shared by every storage backend.
///
/// Missing keys are never an error. Errors are reserved for a backend that
/// cannot serve the request and are reported as
/// [`CacheError::BackendUnavailable`](crate::CacheError::BackendUnavailable).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Get a live value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>>;

    /// Store a value, replacing any existing entry. `None` TTL never expires.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key. No-op when absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every entry owned by this backend instance.
    async fn delete_all(&self) -> Result<()>;

    /// Live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
