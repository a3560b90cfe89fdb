//! Rate limit counter storage.
//!
//! The store keeps one windowed counter per key. Logical expiry (an entry
//! whose window has passed is absent) is the source of truth; physical
//! eviction is an advisory cleanup that bounds memory and may run at any
//! cadence, or never, without affecting decisions.
//!
//! Per-key atomicity lives behind this seam: [`RateLimitStore::incr`] is the
//! load-or-initialize-and-increment step, serialized per key so that two
//! requests arriving in the same millisecond are both counted. A distributed
//! implementation maps `incr` onto the backing store's atomic primitive.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::unix_ms;

/// Storage failure surfaced to the limiter, which fails open on it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// One key's counter and window boundaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub key: String,
    pub count: u32,
    pub window_start_ms: u64,
    pub reset_at_ms: u64,
}

impl RateLimitEntry {
    /// An entry is logically absent once its window has rolled over.
    /// The boundary itself belongs to the new window.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_at_ms
    }
}

/// Pluggable key→counter storage with expiration.
///
/// `get` must treat an entry whose reset time has passed as absent even if
/// it is still physically stored.
pub trait RateLimitStore: Send + Sync {
    /// Atomically load-or-initialize the entry for `key` and increment its
    /// count, starting a fresh window when the stored one has expired.
    fn incr(
        &self,
        key: &str,
        window: Duration,
    ) -> impl Future<Output = Result<RateLimitEntry, StoreError>> + Send;

    /// Fetch the live entry for `key`, if any.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<RateLimitEntry>, StoreError>> + Send;

    /// Establish or replace the entry, scheduling physical eviction no later
    /// than `ttl` from now.
    fn set(
        &self,
        key: &str,
        entry: RateLimitEntry,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove the entry for `key`. Returns whether one was present.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Drop all entries.
    fn clear(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl<T: RateLimitStore> RateLimitStore for std::sync::Arc<T> {
    async fn incr(&self, key: &str, window: Duration) -> Result<RateLimitEntry, StoreError> {
        (**self).incr(key, window).await
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitEntry>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, entry: RateLimitEntry, ttl: Duration) -> Result<(), StoreError> {
        (**self).set(key, entry, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        (**self).clear().await
    }
}

const SHARD_COUNT: usize = 16;

#[derive(Clone, Debug)]
struct StoredEntry {
    count: u32,
    window_start_ms: u64,
    reset_at_ms: u64,
    evict_at_ms: u64,
}

/// In-process store backed by a sharded map.
///
/// Sharding keeps write contention scoped to a slice of the keyspace; no
/// lock is held across an await point.
#[derive(Debug)]
pub struct MemoryRateLimitStore {
    shards: Vec<Mutex<HashMap<String, StoredEntry>>>,
}

impl Default for MemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRateLimitStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, StoredEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Evict physically expired entries. Returns how many were removed.
    ///
    /// Advisory only; `get`/`incr` already ignore expired entries.
    pub fn sweep_now(&self) -> usize {
        let now = unix_ms();
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.lock().unwrap_or_else(PoisonError::into_inner);
            let before = map.len();
            map.retain(|_, entry| now < entry.evict_at_ms);
            removed += before - map.len();
        }
        removed
    }

    /// Number of physically stored entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len()
            })
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    async fn incr(&self, key: &str, window: Duration) -> Result<RateLimitEntry, StoreError> {
        #[allow(clippy::cast_possible_truncation)] // windows are small durations
        let window_ms = window.as_millis() as u64;
        let now = unix_ms();
        let mut map = self.shard(key).lock().unwrap_or_else(PoisonError::into_inner);

        let entry = map
            .get(key)
            .filter(|entry| now < entry.reset_at_ms)
            .cloned()
            .unwrap_or(StoredEntry {
                count: 0,
                window_start_ms: now,
                reset_at_ms: now + window_ms,
                evict_at_ms: now + window_ms,
            });

        let updated = StoredEntry {
            count: entry.count.saturating_add(1),
            evict_at_ms: entry.reset_at_ms,
            ..entry
        };
        map.insert(key.to_string(), updated.clone());

        Ok(RateLimitEntry {
            key: key.to_string(),
            count: updated.count,
            window_start_ms: updated.window_start_ms,
            reset_at_ms: updated.reset_at_ms,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitEntry>, StoreError> {
        let now = unix_ms();
        let mut map = self.shard(key).lock().unwrap_or_else(PoisonError::into_inner);
        match map.get(key) {
            Some(entry) if now < entry.reset_at_ms => Ok(Some(RateLimitEntry {
                key: key.to_string(),
                count: entry.count,
                window_start_ms: entry.window_start_ms,
                reset_at_ms: entry.reset_at_ms,
            })),
            Some(_) => {
                // Lazy eviction: the entry is logically absent either way.
                map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: RateLimitEntry, ttl: Duration) -> Result<(), StoreError> {
        #[allow(clippy::cast_possible_truncation)]
        let ttl_ms = ttl.as_millis() as u64;
        let mut map = self.shard(key).lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(
            key.to_string(),
            StoredEntry {
                count: entry.count,
                window_start_ms: entry.window_start_ms,
                reset_at_ms: entry.reset_at_ms,
                evict_at_ms: unix_ms() + ttl_ms,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut map = self.shard(key).lock().unwrap_or_else(PoisonError::into_inner);
        Ok(map.remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        for shard in &self.shards {
            shard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        Ok(())
    }
}
