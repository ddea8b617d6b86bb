//! Process-local entry store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::entry::{EntryKey, RateLimitEntry};
use super::store::{EntryStore, StoreResult};

/// In-memory entry store for single-instance deployments.
///
/// Backed by a sharded concurrent map, so individual gets and sets are atomic
/// but a get followed by a set is not.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<EntryKey, RateLimitEntry>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn get(&self, key: &EntryKey) -> StoreResult<Option<RateLimitEntry>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &EntryKey, entry: &RateLimitEntry) -> StoreResult<()> {
        self.entries.insert(key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &EntryKey) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.entries.len())
    }
}
