//! Fingerprint Cache
//!
//! A TTL key-value store keyed by `(group_key, session_id)`. The group key
//! is normally derived from a request fingerprint; the session id keeps
//! concurrent writers for the same group from overwriting each other.
//!
//! - Entries are created on `set` and never deleted.
//! - Expiry is computed at read time: an entry is expired once strictly
//!   more than `ttl_seconds` have elapsed since it was written. An entry
//!   read at exactly `created_at + ttl` is still valid.
//! - Several valid entries may exist per group; `get` returns the first one
//!   the store yields, which is not necessarily the newest.
//! - Store errors propagate to the caller unchanged; there are no retries.
//!
//! Values pass through a [`ValueCodec`] chosen at construction, so the
//! store only ever sees text.

mod codec;
mod memory;
mod redis_store;

pub use codec::{JsonCodec, TextCodec, ValueCodec};
pub use memory::MemoryStore;
pub use redis_store::{RedisStore, DEFAULT_KEY_PREFIX};

use crate::error::{CacheError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Default entry lifetime in seconds (55 minutes)
pub const DEFAULT_TTL_SECS: u64 = 3300;

// ============================================================================
// Entries and Records
// ============================================================================

/// A decoded cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<T> {
    /// Deduplication group, usually fingerprint based
    pub group_key: String,
    /// Writer identity within the group
    pub session_id: String,
    /// Write time
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds
    pub ttl_seconds: u64,
    /// Cached value
    pub value: T,
}

impl<T> CacheEntry<T> {
    /// Instant after which the entry counts as expired
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at
            .checked_add_signed(ttl_duration(self.ttl_seconds))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Check expiry against a given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.created_at, self.ttl_seconds, now)
    }
}

/// Schemaless form of an entry as persisted by a [`RecordStore`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// Deduplication group
    pub group_key: String,
    /// Writer identity within the group
    pub session_id: String,
    /// Write time
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds
    pub ttl_seconds: u64,
    /// Codec-encoded value
    pub value: String,
}

impl StoredRecord {
    /// Check expiry against a given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.created_at, self.ttl_seconds, now)
    }
}

fn ttl_duration(ttl_seconds: u64) -> Duration {
    i64::try_from(ttl_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn is_expired(created_at: DateTime<Utc>, ttl_seconds: u64, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(created_at) > ttl_duration(ttl_seconds)
}

// ============================================================================
// Record Store
// ============================================================================

/// Partition-scoped storage for cache records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the record for `(group_key, session_id)`
    async fn upsert(&self, record: StoredRecord) -> std::result::Result<(), CacheError>;

    /// All records of a group, expired ones included
    async fn scan(&self, group_key: &str) -> std::result::Result<Vec<StoredRecord>, CacheError>;
}

// ============================================================================
// Statistics
// ============================================================================

/// Cache counters
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups that found a valid entry
    pub hits: AtomicU64,
    /// Lookups that found nothing valid
    pub misses: AtomicU64,
    /// Entries written
    pub writes: AtomicU64,
    /// Records skipped because they had expired
    pub expired_skipped: AtomicU64,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0.0 with no lookups
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            expired_skipped: self.expired_skipped.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Snapshot of [`CacheStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Lookups that found a valid entry
    pub hits: u64,
    /// Lookups that found nothing valid
    pub misses: u64,
    /// Entries written
    pub writes: u64,
    /// Records skipped because they had expired
    pub expired_skipped: u64,
    /// hits / (hits + misses)
    pub hit_rate: f64,
}

// ============================================================================
// Fingerprint Cache
// ============================================================================

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// TTL cache of `T` over a pluggable record store
pub struct FingerprintCache<T> {
    store: Arc<dyn RecordStore>,
    codec: Arc<dyn ValueCodec<T>>,
    default_ttl: u64,
    clock: Clock,
    stats: Arc<CacheStats>,
}

impl<T> Clone for FingerprintCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            codec: Arc::clone(&self.codec),
            default_ttl: self.default_ttl,
            clock: Arc::clone(&self.clock),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl FingerprintCache<String> {
    /// Cache of raw strings stored verbatim
    pub fn text(store: Arc<dyn RecordStore>) -> Self {
        Self::new(store, Arc::new(TextCodec))
    }
}

impl<T: 'static> FingerprintCache<T> {
    /// Create a cache over a store with the given codec
    pub fn new(store: Arc<dyn RecordStore>, codec: Arc<dyn ValueCodec<T>>) -> Self {
        Self {
            store,
            codec,
            default_ttl: DEFAULT_TTL_SECS,
            clock: Arc::new(Utc::now),
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Set the TTL used by [`FingerprintCache::set_default`]
    pub fn with_default_ttl(mut self, ttl_seconds: u64) -> Self {
        self.default_ttl = ttl_seconds;
        self
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// TTL used by [`FingerprintCache::set_default`]
    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    /// Cache counters
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn decode(&self, record: StoredRecord) -> Result<CacheEntry<T>> {
        let value = self.codec.decode(&record.value)?;
        Ok(CacheEntry {
            group_key: record.group_key,
            session_id: record.session_id,
            created_at: record.created_at,
            ttl_seconds: record.ttl_seconds,
            value,
        })
    }

    async fn live_records(&self, group_key: &str) -> Result<Vec<StoredRecord>> {
        let now = (self.clock)();
        let records = self.store.scan(group_key).await?;
        let total = records.len();

        let live: Vec<StoredRecord> = records
            .into_iter()
            .filter(|r| !r.is_expired_at(now))
            .collect();

        let skipped = (total - live.len()) as u64;
        if skipped > 0 {
            self.stats.expired_skipped.fetch_add(skipped, Ordering::Relaxed);
        }
        Ok(live)
    }

    fn record_lookup(&self, group_key: &str, hit: bool) {
        if hit {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(group = group_key, "Cache hit");
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!(group = group_key, "Cache miss");
        }
    }

    /// Any one non-expired entry of the group
    pub async fn get(&self, group_key: &str) -> Result<Option<CacheEntry<T>>> {
        let first = self.live_records(group_key).await?.into_iter().next();
        self.record_lookup(group_key, first.is_some());
        first.map(|record| self.decode(record)).transpose()
    }

    /// Every non-expired entry of the group
    pub async fn get_all(&self, group_key: &str) -> Result<Vec<CacheEntry<T>>> {
        let live = self.live_records(group_key).await?;
        self.record_lookup(group_key, !live.is_empty());
        live.into_iter().map(|record| self.decode(record)).collect()
    }

    /// Insert or replace the entry for `(group_key, session_id)`
    pub async fn set(
        &self,
        group_key: &str,
        session_id: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<()> {
        let record = StoredRecord {
            group_key: group_key.to_string(),
            session_id: session_id.to_string(),
            created_at: (self.clock)(),
            ttl_seconds,
            value: self.codec.encode(value)?,
        };

        self.store.upsert(record).await?;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        debug!(group = group_key, session = session_id, ttl_seconds, "Cache write");
        Ok(())
    }

    /// [`FingerprintCache::set`] with the configured default TTL
    pub async fn set_default(&self, group_key: &str, session_id: &str, value: &T) -> Result<()> {
        self.set(group_key, session_id, value, self.default_ttl).await
    }
}
