//! In-process record store

use super::{RecordStore, StoredRecord};
use crate::error::CacheError;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Record store backed by a map of groups to session-keyed records
///
/// Scans return records in first-insert order per group.
#[derive(Debug, Default)]
pub struct MemoryStore {
    groups: RwLock<HashMap<String, IndexMap<String, StoredRecord>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is, bypassing the cache
    ///
    /// Lets tests plant records with arbitrary timestamps or undecodable
    /// values.
    pub fn insert_raw(&self, record: StoredRecord) {
        self.groups
            .write()
            .entry(record.group_key.clone())
            .or_default()
            .insert(record.session_id.clone(), record);
    }

    /// Total number of records across all groups
    pub fn len(&self) -> usize {
        self.groups.read().values().map(IndexMap::len).sum()
    }

    /// Check if the store holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(&self, record: StoredRecord) -> Result<(), CacheError> {
        self.insert_raw(record);
        Ok(())
    }

    async fn scan(&self, group_key: &str) -> Result<Vec<StoredRecord>, CacheError> {
        Ok(self
            .groups
            .read()
            .get(group_key)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(group: &str, session: &str, value: &str) -> StoredRecord {
        StoredRecord {
            group_key: group.to_string(),
            session_id: session.to_string(),
            created_at: Utc::now(),
            ttl_seconds: 60,
            value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_merges_by_session() {
        let store = MemoryStore::new();
        store.upsert(record("g", "s1", "a")).await.unwrap();
        store.upsert(record("g", "s2", "b")).await.unwrap();
        store.upsert(record("g", "s1", "c")).await.unwrap();

        let records = store.scan("g").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, "c");
        assert_eq!(records[1].value, "b");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_scan_unknown_group() {
        let store = MemoryStore::new();
        assert!(store.scan("missing").await.unwrap().is_empty());
        assert!(store.is_empty());
    }
}
