//! Instrumented backends shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cacheable::{CacheBackend, CacheError, MemoryBackend, Result};

/// Memory backend that counts calls and can be switched to failing.
#[derive(Default)]
pub struct CountingBackend {
    inner: MemoryBackend,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub deletes: AtomicUsize,
    reads_failing: AtomicBool,
    writes_failing: AtomicBool,
}

impl CountingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with `BackendUnavailable`.
    pub fn fail(&self) {
        self.reads_failing.store(true, Ordering::SeqCst);
        self.writes_failing.store(true, Ordering::SeqCst);
    }

    /// Make subsequent `get` calls fail; writes keep working.
    pub fn fail_reads(&self) {
        self.reads_failing.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    fn check(&self, flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(CacheError::backend_unavailable("counting", "switched off"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn get(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check(&self.reads_failing)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check(&self.writes_failing)?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check(&self.writes_failing)?;
        self.inner.delete(key).await
    }

    async fn delete_all(&self) -> Result<()> {
        self.check(&self.writes_failing)?;
        self.inner.delete_all().await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.check(&self.writes_failing)?;
        self.inner.keys(prefix).await
    }
}

/// Backend whose every operation fails.
pub struct FailingBackend;

#[async_trait]
impl CacheBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, _key: &str) -> Result<Option<Arc<Vec<u8>>>> {
        Err(CacheError::backend_unavailable("failing", "connection refused"))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
        Err(CacheError::backend_unavailable("failing", "connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(CacheError::backend_unavailable("failing", "connection refused"))
    }

    async fn delete_all(&self) -> Result<()> {
        Err(CacheError::backend_unavailable("failing", "connection refused"))
    }

    async fn keys(&self, _prefix: &str) -> Result<Vec<String>> {
        Err(CacheError::backend_unavailable("failing", "connection refused"))
    }
}
