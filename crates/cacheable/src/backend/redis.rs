//! Redis cache backend.
//!
//! Commands go through a `deadpool-redis` pool. Every command is bounded by
//! the socket timeout; pool checkout is bounded by the connect timeout. Any
//! failure surfaces as [`CacheError::BackendUnavailable`] and is never
//! swallowed here.
//!
//! ## Key Namespace
//!
//! Keys are stored as `{key_prefix}{key}`. With a non-empty prefix,
//! `delete_all` removes only this namespace (SCAN + DEL). With an empty
//! prefix it issues `FLUSHDB`, which clears the whole logical database.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Connection, Pool, Runtime};
use serde::{Deserialize, Serialize};

use super::CacheBackend;
use crate::error::{CacheError, Result};

const BACKEND: &str = "redis";
const SCAN_BATCH: usize = 500;

/// Connection settings for [`RedisBackend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Server host name or address
    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// ACL user name (requires `password`)
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index
    #[serde(default)]
    pub database: u32,

    /// Pool checkout / connection establishment timeout in milliseconds
    #[serde(default = "default_redis_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-command response timeout in milliseconds
    #[serde(default = "default_redis_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Namespace prepended to every key. Empty means unscoped.
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,

    /// Use the in-memory backend when Redis is unreachable at startup
    #[serde(default)]
    pub fallback_to_memory: bool,
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_connect_timeout_ms() -> u64 {
    500
}

fn default_redis_socket_timeout_ms() -> u64 {
    500
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_key_prefix() -> String {
    "cacheable:".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            username: None,
            password: None,
            database: 0,
            connect_timeout_ms: default_redis_connect_timeout_ms(),
            socket_timeout_ms: default_redis_socket_timeout_ms(),
            pool_size: default_redis_pool_size(),
            key_prefix: default_redis_key_prefix(),
            fallback_to_memory: false,
        }
    }
}

impl RedisConfig {
    /// Local server on `port`, database 0.
    pub fn localhost(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn remote(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username;
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: u32) -> Self {
        self.database = database;
        self
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(CacheError::configuration("redis.host must not be empty"));
        }
        if self.host.contains(['/', '@', '?', '#']) {
            return Err(CacheError::configuration(
                "redis.host must be a bare host name or address",
            ));
        }
        if self.port == 0 {
            return Err(CacheError::configuration("redis.port must be > 0"));
        }
        if self.username.is_some() && self.password.is_none() {
            return Err(CacheError::configuration(
                "redis.username requires redis.password",
            ));
        }
        if self.connect_timeout_ms == 0 || self.socket_timeout_ms == 0 {
            return Err(CacheError::configuration("redis timeouts must be > 0"));
        }
        if self.pool_size == 0 {
            return Err(CacheError::configuration("redis.pool_size must be > 0"));
        }
        Ok(())
    }

    /// Connection URL with credentials percent-encoded.
    pub fn url(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!(
                "{}:{}@",
                urlencoding::encode(user),
                urlencoding::encode(pass)
            ),
            (None, Some(pass)) => format!(":{}@", urlencoding::encode(pass)),
            _ => String::new(),
        };
        format!("redis://{auth}{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Networked backend over a Redis connection pool.
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    key_prefix: Arc<str>,
    socket_timeout: Duration,
}

impl RedisBackend {
    /// Validate `config` and build the pool. No connection is opened yet.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        config.validate()?;

        let mut redis_config = deadpool_redis::Config::from_url(config.url());
        let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.connect_timeout());
        pool_config.timeouts.create = Some(config.connect_timeout());
        pool_config.timeouts.recycle = Some(config.connect_timeout());
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::configuration(format!("failed to create Redis pool: {e}")))?;

        Ok(Self {
            pool,
            key_prefix: Arc::from(config.key_prefix.as_str()),
            socket_timeout: config.socket_timeout(),
        })
    }

    /// Build the backend and verify the server answers `PING`.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let backend = Self::new(config)?;
        backend.ping().await?;
        tracing::info!(host = %config.host, port = config.port, db = config.database, "Connected to Redis");
        Ok(backend)
    }

    /// Health check.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool.get().await.map_err(|e| {
            CacheError::backend_unavailable(BACKEND, format!("failed to get connection: {e}"))
        })
    }

    /// Apply the socket timeout to one command.
    async fn bounded<T>(
        &self,
        command: &str,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.socket_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::backend_unavailable(
                BACKEND,
                format!("{command} failed: {e}"),
            )),
            Err(_) => Err(CacheError::backend_unavailable(
                BACKEND,
                format!("{command} timed out after {:?}", self.socket_timeout),
            )),
        }
    }

    /// Full (namespaced) keys matching `pattern`, via SCAN.
    async fn scan(&self, conn: &mut Connection, pattern: &str) -> Result<Vec<String>> {
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut *conn),
                )
                .await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(found)
    }
}

/// Escape glob metacharacters so a literal prefix can be used in MATCH.
fn glob_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// TTL in whole milliseconds, at least 1 (`PX 0` is rejected by Redis).
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>> {
        let mut conn = self.connection().await?;
        let data: Option<Vec<u8>> = self
            .bounded("GET", conn.get(self.namespaced(key)))
            .await?;
        Ok(data.map(Arc::new))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.namespaced(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = self.bounded("SET", cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = self
            .bounded("DEL", conn.del(self.namespaced(key)))
            .await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        if self.key_prefix.is_empty() {
            tracing::warn!("Redis key prefix is empty, flushing the whole database");
            let _: () = self
                .bounded("FLUSHDB", redis::cmd("FLUSHDB").query_async(&mut conn))
                .await?;
            return Ok(());
        }

        let pattern = format!("{}*", glob_escape(&self.key_prefix));
        let keys = self.scan(&mut conn, &pattern).await?;
        for chunk in keys.chunks(SCAN_BATCH) {
            let _: () = self.bounded("DEL", conn.del(chunk.to_vec())).await?;
        }
        tracing::debug!(removed = keys.len(), prefix = %self.key_prefix, "Redis namespace cleared");
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", glob_escape(&self.namespaced(prefix)));
        let keys = self.scan(&mut conn, &pattern).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&*self.key_prefix).map(str::to_string))
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        self.bounded("EXISTS", conn.exists(self.namespaced(key)))
            .await
    }
}
