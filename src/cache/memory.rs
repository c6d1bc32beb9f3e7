//! In-memory cache store (for testing or ephemeral runs)

use crate::cache::{CacheEntry, CacheError, CacheKey, CacheStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

/// A stored blob; the access time is updated in place under the read lock
struct Slot {
    value: Vec<u8>,
    stored_at: DateTime<Utc>,
    /// Microseconds since the Unix epoch
    last_accessed: AtomicI64,
}

impl Slot {
    fn new(value: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            value,
            stored_at: now,
            last_accessed: AtomicI64::new(now.timestamp_micros()),
        }
    }

    fn touch(&self) {
        self.last_accessed
            .fetch_max(Utc::now().timestamp_micros(), Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheEntry {
        let micros = self.last_accessed.load(Ordering::Relaxed);
        CacheEntry {
            value: self.value.clone(),
            stored_at: self.stored_at,
            last_accessed: DateTime::from_timestamp_micros(micros).unwrap_or(self.stored_at),
        }
    }
}

/// Cache store backed by a map; contents vanish with the process
///
/// Lookups share a read lock, so concurrent readers never wait on each other.
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<CacheKey, Slot>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Get an entry with its bookkeeping, without touching the access time
    pub async fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().await.get(key).map(Slot::snapshot)
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).map(|slot| {
            slot.touch();
            slot.value.clone()
        }))
    }

    async fn put(&self, key: &CacheKey, blob: Vec<u8>) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.entry(key.clone()).or_insert_with(|| Slot::new(blob));
        Ok(())
    }
}
