use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{CacheBackend, MemoryBackend, RedisBackend, RedisConfig};
use crate::coordinator::{CacheCoordinator, CacheLayer};
use crate::error::{CacheError, Result};
use crate::tier::TieredCache;

/// Settings for building a cache stack.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheSettings {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub tier: TierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CacheSettings {
    pub fn validate(&self) -> Result<()> {
        if self.memory.sweep_interval_ms == Some(0) {
            return Err(CacheError::configuration(
                "memory.sweep_interval_ms must be > 0 when set",
            ));
        }
        if self.tier.fast_ttl_ms == Some(0) {
            return Err(CacheError::configuration(
                "tier.fast_ttl_ms must be > 0 when set",
            ));
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(CacheError::configuration(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        if self.backend.uses_redis() {
            self.redis.validate()?;
        }
        Ok(())
    }
}

/// Which backend stack to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Redis,
    /// In-memory fast tier over a Redis slow tier.
    Tiered,
}

impl BackendKind {
    pub fn uses_redis(self) -> bool {
        matches!(self, Self::Redis | Self::Tiered)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryConfig {
    /// Background purge interval in milliseconds. Unset disables the sweeper.
    #[serde(default)]
    pub sweep_interval_ms: Option<u64>,
}

impl MemoryConfig {
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// TTL of entries copied into the fast tier, in milliseconds.
    /// Unset keeps them until invalidated.
    #[serde(default = "default_fast_ttl_ms")]
    pub fast_ttl_ms: Option<u64>,
}

fn default_fast_ttl_ms() -> Option<u64> {
    Some(60_000)
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            fast_ttl_ms: default_fast_ttl_ms(),
        }
    }
}

impl TierConfig {
    pub fn fast_ttl(&self) -> Option<Duration> {
        self.fast_ttl_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Build the cache layer selected by `settings`.
///
/// Redis is pinged before use. If it does not answer, startup fails unless
/// `redis.fallback_to_memory` is set.
pub async fn build_cache_layer(settings: &CacheSettings) -> Result<Arc<dyn CacheLayer>> {
    settings.validate()?;

    let layer: Arc<dyn CacheLayer> = match settings.backend {
        BackendKind::Memory => {
            tracing::info!("Using in-memory cache");
            Arc::new(CacheCoordinator::new(memory_backend(&settings.memory)))
        }
        BackendKind::Redis => match connect_redis(&settings.redis).await? {
            Some(redis) => Arc::new(CacheCoordinator::new(redis)),
            None => Arc::new(CacheCoordinator::new(memory_backend(&settings.memory))),
        },
        BackendKind::Tiered => match connect_redis(&settings.redis).await? {
            Some(redis) => {
                tracing::info!(fast_ttl = ?settings.tier.fast_ttl(), "Using tiered cache (memory over redis)");
                Arc::new(TieredCache::new(
                    memory_backend(&settings.memory),
                    redis,
                    settings.tier.fast_ttl(),
                ))
            }
            None => Arc::new(CacheCoordinator::new(memory_backend(&settings.memory))),
        },
    };
    Ok(layer)
}

fn memory_backend(config: &MemoryConfig) -> Arc<dyn CacheBackend> {
    let backend = Arc::new(MemoryBackend::new());
    if let Some(interval) = config.sweep_interval() {
        backend.spawn_sweeper(interval).detach();
    }
    backend
}

/// `Ok(None)` means Redis is unreachable and the memory fallback applies.
async fn connect_redis(config: &RedisConfig) -> Result<Option<Arc<dyn CacheBackend>>> {
    match RedisBackend::connect(config).await {
        Ok(backend) => Ok(Some(Arc::new(backend))),
        Err(e) if config.fallback_to_memory && e.is_backend_unavailable() => {
            tracing::warn!(
                error = %e,
                "Redis unreachable. Falling back to in-memory cache."
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub mod loader {
    use super::CacheSettings;
    use crate::error::{CacheError, Result};
    use ::config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "cacheable.toml";

    /// Load settings from an optional TOML file, then `CACHEABLE__*`
    /// environment overrides, and validate the result.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_settings(path: Option<&str>) -> Result<CacheSettings> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        // Environment variable overrides, e.g., CACHEABLE__REDIS__PORT=6380
        builder = builder.add_source(
            Environment::with_prefix("CACHEABLE")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::configuration(format!("config build error: {e}")))?;
        let merged: CacheSettings = cfg
            .try_deserialize()
            .map_err(|e| CacheError::configuration(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = CacheSettings::default();
        assert_eq!(settings.backend, BackendKind::Memory);
        assert_eq!(settings.tier.fast_ttl(), Some(Duration::from_secs(60)));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let file = write_toml(
            r#"
backend = "tiered"

[memory]
sweep_interval_ms = 1000

[redis]
host = "cache.internal"
port = 6380
key_prefix = "app:"

[tier]
fast_ttl_ms = 5000

[logging]
level = "debug"
"#,
        );

        let settings = loader::load_settings(file.path().to_str()).unwrap();
        assert_eq!(settings.backend, BackendKind::Tiered);
        assert_eq!(settings.memory.sweep_interval(), Some(Duration::from_secs(1)));
        assert_eq!(settings.redis.host, "cache.internal");
        assert_eq!(settings.redis.port, 6380);
        assert_eq!(settings.redis.key_prefix, "app:");
        assert_eq!(settings.redis.pool_size, 10);
        assert_eq!(settings.tier.fast_ttl(), Some(Duration::from_secs(5)));
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let settings = loader::load_settings(path.to_str()).unwrap();
        assert_eq!(settings.backend, BackendKind::Memory);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let file = write_toml("[logging]\nlevel = \"loud\"\n");
        assert!(matches!(
            loader::load_settings(file.path().to_str()),
            Err(CacheError::Configuration(_))
        ));

        let file = write_toml("backend = \"redis\"\n[redis]\nport = 0\n");
        assert!(loader::load_settings(file.path().to_str()).is_err());

        let file = write_toml("backend = \"disk\"\n");
        assert!(loader::load_settings(file.path().to_str()).is_err());
    }

    #[test]
    fn test_redis_settings_ignored_for_memory_backend() {
        let mut settings = CacheSettings::default();
        settings.redis.port = 0;
        assert!(settings.validate().is_ok());

        settings.backend = BackendKind::Redis;
        assert!(settings.validate().is_err());
    }

    #[tokio::test]
    async fn test_build_memory_layer() {
        let settings = CacheSettings::default();
        let layer = build_cache_layer(&settings).await.unwrap();
        let key = crate::CacheKey::from_raw("k");
        layer.store(&key, vec![1], None).await.unwrap();
        assert!(layer.lookup(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails_without_fallback() {
        let mut settings = CacheSettings {
            backend: BackendKind::Redis,
            ..Default::default()
        };
        settings.redis = RedisConfig::localhost(1);

        let result = build_cache_layer(&settings).await;
        assert!(matches!(
            result,
            Err(CacheError::BackendUnavailable { .. })
        ));

        settings.redis.fallback_to_memory = true;
        let layer = build_cache_layer(&settings).await.unwrap();
        let key = crate::CacheKey::from_raw("k");
        layer.store(&key, vec![1], None).await.unwrap();
        assert!(layer.lookup(&key).await.is_some());
    }
}
