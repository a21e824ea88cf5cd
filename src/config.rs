//! Configuration management
//!
//! TOML file support with environment variable overrides and defaults.
//!
//! ```toml
//! [processor]
//! workers = 8
//! host = "gateway-01"
//!
//! [cache]
//! backend = "redis"
//! redis_url = "redis://cache:6379"
//! key_prefix = "gateway:cache"
//! default_ttl_secs = 3300
//! connection_timeout_ms = 5000
//!
//! [logging]
//! level = "info"
//! ```

use crate::cache::{
    FingerprintCache, MemoryStore, RecordStore, RedisStore, DEFAULT_KEY_PREFIX, DEFAULT_TTL_SECS,
};
use crate::error::{Error, Result};
use crate::redis::RedisConfig;
use crate::shard::shard_queues;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Job processing
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Result cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Job processing configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProcessorConfig {
    /// Worker count; the host owns `max(1, workers / 2)` queues
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Host identifier used in queue names
    #[serde(default = "default_host")]
    pub host: String,
}

/// Where cache records live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process map
    #[default]
    Memory,
    /// Redis hashes
    Redis,
}

/// Result cache configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Record store
    #[serde(default)]
    pub backend: CacheBackend,

    /// Redis URL, used by the redis backend
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix of Redis keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Entry lifetime in seconds
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Redis connect timeout in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_host() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}
fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}
fn default_connection_timeout_ms() -> u64 {
    5000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            host: default_host(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            default_ttl_secs: default_ttl_secs(),
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ProcessorConfig {
    /// Queue names for a host under this worker count
    pub fn queues(&self, host: &str) -> Vec<String> {
        shard_queues(self.workers, host)
    }
}

impl CacheConfig {
    /// Redis connection settings derived from this section
    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig::with_url(self.redis_url.clone())
            .connection_timeout(Duration::from_millis(self.connection_timeout_ms))
    }

    /// Build the configured record store
    pub fn build_store(&self) -> Result<Arc<dyn RecordStore>> {
        let store: Arc<dyn RecordStore> = match self.backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new()),
            CacheBackend::Redis => Arc::new(
                RedisStore::new(self.redis_config())?.with_prefix(self.key_prefix.clone()),
            ),
        };
        Ok(store)
    }

    /// Build a string cache over the configured store
    pub fn build_cache(&self) -> Result<FingerprintCache<String>> {
        Ok(FingerprintCache::text(self.build_store()?).with_default_ttl(self.default_ttl_secs))
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// `GATEWAY_WORKERS`, `GATEWAY_HOST`, `GATEWAY_REDIS_URL` (also switches
    /// the cache to redis), `GATEWAY_CACHE_TTL` and `RUST_LOG`. Unparseable
    /// numbers are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Processor
        if let Some(workers) = lookup("GATEWAY_WORKERS").and_then(|v| v.parse().ok()) {
            self.processor.workers = workers;
        }
        if let Some(host) = lookup("GATEWAY_HOST") {
            self.processor.host = host;
        }

        // Cache
        if let Some(url) = lookup("GATEWAY_REDIS_URL") {
            self.cache.redis_url = url;
            self.cache.backend = CacheBackend::Redis;
        }
        if let Some(ttl) = lookup("GATEWAY_CACHE_TTL").and_then(|v| v.parse().ok()) {
            self.cache.default_ttl_secs = ttl;
        }

        // Logging
        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.processor.host.trim().is_empty() {
            return Err(Error::Configuration("Processor host cannot be empty".to_string()));
        }
        if self.cache.default_ttl_secs == 0 {
            return Err(Error::Configuration("Cache TTL must be > 0".to_string()));
        }
        if self.cache.backend == CacheBackend::Redis {
            self.cache
                .redis_config()
                .validate()
                .map_err(Error::Configuration)?;
        }
        if self.logging.level.trim().is_empty() {
            return Err(Error::Configuration("Log level cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}
