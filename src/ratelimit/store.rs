//! Storage trait for abstracting local and shared entry stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::entry::{EntryKey, RateLimitEntry};

/// Errors raised by entry stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded
    #[error("corrupt entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Trait for rate limit entry storage.
///
/// This trait abstracts over the process-local `MemoryStore` and the
/// gossip-backed `GossipStore` so the limiter works with either. Entries carry
/// their own expiry (`reset_at`); stores may drop them any time after it.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Fetch the entry for a key, expired or not.
    async fn get(&self, key: &EntryKey) -> StoreResult<Option<RateLimitEntry>>;

    /// Insert or overwrite the entry for a key.
    async fn set(&self, key: &EntryKey, entry: &RateLimitEntry) -> StoreResult<()>;

    /// Remove the entry for a key. Missing keys are not an error.
    async fn delete(&self, key: &EntryKey) -> StoreResult<()>;

    /// Remove every entry whose window closed before `now`, returning how many.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    /// Number of stored entries.
    async fn len(&self) -> StoreResult<usize>;
}
