//! Shared entry store using Chitchat cluster state.
//!
//! Each node publishes the entries it writes into its own gossip key space
//! as JSON. Reads merge every live node's copy and keep the newest window,
//! so a node that rolls a window over supersedes older copies elsewhere.
//! Nothing here is atomic across nodes: two nodes checking the same key
//! at the same moment can both admit.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::mesh::Cluster;

use super::entry::{EntryKey, RateLimitEntry};
use super::store::{EntryStore, StoreError, StoreResult};

/// An entry store backed by gossip state.
pub struct GossipStore {
    /// The cluster for shared state.
    cluster: Arc<Cluster>,
    /// Keys this node has published and not yet retracted.
    published: Mutex<HashSet<EntryKey>>,
}

impl GossipStore {
    /// Create a store over a running cluster node.
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self {
            cluster,
            published: Mutex::new(HashSet::new()),
        }
    }
}

/// Pick the copy with the latest window, then the highest count.
fn newest(copies: impl IntoIterator<Item = RateLimitEntry>) -> Option<RateLimitEntry> {
    copies
        .into_iter()
        .max_by(|a, b| (a.reset_at, a.count).cmp(&(b.reset_at, b.count)))
}

#[async_trait]
impl EntryStore for GossipStore {
    async fn get(&self, key: &EntryKey) -> StoreResult<Option<RateLimitEntry>> {
        let gossip_key = key.to_gossip_key();
        let values = self.cluster.read_all(&gossip_key).await;

        let copies = values.iter().filter_map(|value| {
            match serde_json::from_str::<RateLimitEntry>(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(key = %key, error = %e, "Ignoring undecodable gossip entry");
                    None
                }
            }
        });

        let entry = newest(copies);
        trace!(key = %key, copies = values.len(), found = entry.is_some(), "Read gossip entry");
        Ok(entry)
    }

    async fn set(&self, key: &EntryKey, entry: &RateLimitEntry) -> StoreResult<()> {
        let value = serde_json::to_string(entry).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        self.cluster.write_local(&key.to_gossip_key(), value).await;
        self.published.lock().insert(key.clone());
        Ok(())
    }

    async fn delete(&self, key: &EntryKey) -> StoreResult<()> {
        self.cluster.delete_local(&key.to_gossip_key()).await;
        self.published.lock().remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let keys: Vec<EntryKey> = self.published.lock().iter().cloned().collect();
        let mut removed = 0;

        for key in keys {
            let expired = match self.get(&key).await? {
                Some(entry) => entry.is_expired(now),
                None => true,
            };

            if expired {
                self.delete(&key).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.published.lock().len())
    }
}
