//! Redis-backed record store
//!
//! # Key layout
//!
//! ```text
//! {prefix}:{group_key}   HASH   session_id -> JSON StoredRecord
//! ```
//!
//! `HSET` gives insert-or-merge per session and `HGETALL` scans a group.
//! Nothing is ever deleted; expiry is decided at read time by the cache.

use super::{RecordStore, StoredRecord};
use crate::error::CacheError;
use crate::redis::{RedisConfig, RedisConnection};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::warn;

/// Default key prefix
pub const DEFAULT_KEY_PREFIX: &str = "gateway:cache";

/// Record store keeping one Redis hash per group
pub struct RedisStore {
    connection: RedisConnection,
    prefix: String,
}

impl RedisStore {
    /// Create a store for a Redis deployment
    pub fn new(config: RedisConfig) -> Result<Self, CacheError> {
        Ok(Self {
            connection: RedisConnection::new(config)?,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        })
    }

    /// Use a different key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Redis key holding a group's records
    pub fn group_key(&self, group_key: &str) -> String {
        format!("{}:{}", self.prefix, group_key)
    }

    /// Underlying connection
    pub fn connection(&self) -> &RedisConnection {
        &self.connection
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn upsert(&self, record: StoredRecord) -> Result<(), CacheError> {
        let payload =
            serde_json::to_string(&record).map_err(|e| CacheError::Encode(e.to_string()))?;
        let key = self.group_key(&record.group_key);

        let mut conn = self.connection.get().await?;
        let result: Result<(), redis::RedisError> =
            conn.hset(&key, &record.session_id, payload).await;
        self.connection.metrics().record_command(&result);

        if let Err(e) = result {
            warn!(key = %key, "Cache upsert failed");
            return Err(self.connection.command_failed(&e).await);
        }
        Ok(())
    }

    async fn scan(&self, group_key: &str) -> Result<Vec<StoredRecord>, CacheError> {
        let key = self.group_key(group_key);

        let mut conn = self.connection.get().await?;
        let result: Result<HashMap<String, String>, redis::RedisError> = conn.hgetall(&key).await;
        self.connection.metrics().record_command(&result);

        let fields = match result {
            Ok(fields) => fields,
            Err(e) => {
                warn!(key = %key, "Cache scan failed");
                return Err(self.connection.command_failed(&e).await);
            },
        };

        fields
            .into_values()
            .map(|raw| {
                serde_json::from_str::<StoredRecord>(&raw)
                    .map_err(|e| CacheError::Decode(format!("record under {}: {}", key, e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_layout() {
        let store = RedisStore::new(RedisConfig::default()).unwrap();
        assert_eq!(store.group_key("user#abc=#0"), "gateway:cache:user#abc=#0");

        let store = store.with_prefix("tenant-a");
        assert_eq!(store.group_key("g"), "tenant-a:g");
    }

    #[tokio::test]
    async fn test_unreachable_store_propagates_error() {
        let config = RedisConfig::with_url("redis://127.0.0.1:1")
            .connection_timeout(std::time::Duration::from_millis(200));
        let store = RedisStore::new(config).unwrap();

        assert!(matches!(store.scan("g").await, Err(CacheError::Connection(_))));
    }

    #[tokio::test]
    async fn test_scan_reconnects_after_hang_up() {
        let url = crate::redis::testing::spawn_fake_server("HGETALL").await;
        let store = RedisStore::new(RedisConfig::with_url(url)).unwrap();

        assert!(matches!(store.scan("g").await, Err(CacheError::Command(_))));
        assert!(!store.connection().is_connected().await);

        assert!(matches!(store.scan("g").await, Err(CacheError::Command(_))));
        let created = store
            .connection()
            .metrics()
            .connections_created
            .load(std::sync::atomic::Ordering::Relaxed);
        assert_eq!(created, 2);
    }

    #[tokio::test]
    async fn test_reply_error_keeps_connection() {
        // `+OK` is not a hash, so HGETALL fails without losing the socket
        let url = crate::redis::testing::spawn_fake_server("never-sent").await;
        let store = RedisStore::new(RedisConfig::with_url(url)).unwrap();

        assert!(matches!(store.scan("g").await, Err(CacheError::Command(_))));
        assert!(store.connection().is_connected().await);
    }
}
