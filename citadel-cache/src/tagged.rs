//! Tag-based cache invalidation

use crate::error::{CacheError, CacheResult};
use crate::traits::CacheStore;
use chrono::{DateTime, Utc};
use citadel_core::PeriodicTask;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;

/// A cached value with its bookkeeping, as stored in the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub stored_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub tags: Vec<String>,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

struct IndexedKey {
    /// Bumped on every `set`, so cleanup can tell a re-set key from the one it saw
    generation: u64,
    tags: HashSet<String>,
}

#[derive(Default)]
struct TagIndex {
    /// Tag to keys mapping
    tags: HashMap<String, HashSet<String>>,
    /// Key to tags mapping
    keys: HashMap<String, IndexedKey>,
    next_generation: u64,
}

impl TagIndex {
    fn insert(&mut self, key: &str, tags: &[&str]) {
        self.forget_key(key);
        if tags.is_empty() {
            return;
        }

        for tag in tags {
            self.tags
                .entry(tag.to_string())
                .or_default()
                .insert(key.to_string());
        }
        self.next_generation += 1;
        self.keys.insert(
            key.to_string(),
            IndexedKey {
                generation: self.next_generation,
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
        );
    }

    fn generation(&self, key: &str) -> Option<u64> {
        self.keys.get(key).map(|indexed| indexed.generation)
    }

    fn forget_key(&mut self, key: &str) {
        if let Some(indexed) = self.keys.remove(key) {
            for tag in indexed.tags {
                if let Some(keys) = self.tags.get_mut(&tag) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.tags.remove(&tag);
                    }
                }
            }
        }
    }

    /// Forget `key` unless it was set again after `generation` was read.
    fn forget_if_unchanged(&mut self, key: &str, generation: Option<u64>) -> bool {
        if self.generation(key) != generation {
            return false;
        }
        self.forget_key(key);
        true
    }
}

/// Read cache with TTLs and a tag → keys reverse index.
///
/// [`invalidate_by_tag`](Self::invalidate_by_tag) snapshots a tag's keys,
/// deletes them, then drops the snapshotted index entries. A key set again
/// while the delete is in flight keeps its new index entry, so a later
/// invalidation still reaches it. Every key visible when the call starts is
/// evicted.
pub struct TaggedCache {
    store: Arc<dyn CacheStore>,
    index: RwLock<TagIndex>,
    default_ttl: Duration,
    counters: Counters,
    sweeper: PeriodicTask,
}

impl TaggedCache {
    /// Create a tagged cache over a store.
    ///
    /// # Examples
    ///
    /// ```
    /// use citadel_cache::*;
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// # tokio_test::block_on(async {
    /// let cache = TaggedCache::new(Arc::new(MemoryCacheStore::new()));
    /// cache.set("case:42", &"open", Duration::from_secs(60), &["cases:tenant-a"]).await.unwrap();
    ///
    /// cache.invalidate_by_tag("cases:tenant-a").await.unwrap();
    /// assert_eq!(cache.get::<String>("case:42").await.unwrap(), None);
    /// # });
    /// ```
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            index: RwLock::new(TagIndex::default()),
            default_ttl: Duration::from_secs(300),
            counters: Counters::default(),
            sweeper: PeriodicTask::new("cache-expiry", Duration::from_secs(60)),
        }
    }

    /// TTL used by [`set_default`](Self::set_default).
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweeper = PeriodicTask::new("cache-expiry", interval);
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Look up a full entry. Expired and undecodable entries are a miss.
    pub async fn get_entry<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<CacheEntry<T>>> {
        let Some(json) = self.store.get_json(key).await? else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        match serde_json::from_str::<CacheEntry<T>>(&json) {
            Ok(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
            Err(e) => {
                // Written by an older build or for another type; treat as a miss.
                tracing::warn!(key = %key, error = %e, "Dropping undecodable cache entry");
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.delete(key).await?;
                Ok(None)
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        Ok(self.get_entry(key).await?.map(|entry| entry.value))
    }

    /// Store a value and index it under each tag.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        tags: &[&str],
    ) -> CacheResult<()> {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            stored_at: Utc::now(),
            ttl_seconds: ttl.as_secs(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        };
        let json = serde_json::to_string(&entry).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.store.set_json(key, json, Some(ttl)).await?;

        self.index.write().await.insert(key, tags);

        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// [`set`](Self::set) with the default TTL.
    pub async fn set_default<T: Serialize>(&self, key: &str, value: &T, tags: &[&str]) -> CacheResult<()> {
        self.set(key, value, self.default_ttl, tags).await
    }

    /// Return the cached value, or compute, store and return it.
    pub async fn remember<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        tags: &[&str],
        fallback: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let value = fallback().await?;
        self.set(key, &value, ttl, tags).await?;
        Ok(value)
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let generation = self.index.read().await.generation(key);
        self.store.delete(key).await?;
        self.index.write().await.forget_if_unchanged(key, generation);
        Ok(())
    }

    /// Evict every key currently indexed under `tag`. Returns the number of
    /// keys removed.
    ///
    /// The index is left untouched when the store fails, so the call can be
    /// retried.
    pub async fn invalidate_by_tag(&self, tag: &str) -> CacheResult<usize> {
        let snapshot: Vec<(String, Option<u64>)> = {
            let index = self.index.read().await;
            let Some(keys) = index.tags.get(tag) else {
                return Ok(0);
            };
            keys.iter()
                .map(|key| (key.clone(), index.generation(key)))
                .collect()
        };

        let key_refs: Vec<&str> = snapshot.iter().map(|(key, _)| key.as_str()).collect();
        if let Err(e) = self.store.delete_many(&key_refs).await {
            tracing::warn!(tag = %tag, keys = snapshot.len(), error = %e, "Tag invalidation failed, index kept");
            return Err(e);
        }

        let mut reset = 0;
        let mut index = self.index.write().await;
        for (key, generation) in &snapshot {
            // Drops the key from its other tags too.
            if !index.forget_if_unchanged(key, *generation) {
                reset += 1;
            }
        }
        drop(index);

        self.counters
            .evictions
            .fetch_add(snapshot.len() as u64, Ordering::Relaxed);
        tracing::debug!(tag = %tag, evicted = snapshot.len(), reset, "Invalidated cache tag");
        Ok(snapshot.len())
    }

    /// Invalidate several tags. Returns the total number of keys removed.
    pub async fn invalidate_tags(&self, tags: &[String]) -> CacheResult<usize> {
        let mut evicted = 0;
        for tag in tags {
            evicted += self.invalidate_by_tag(tag).await?;
        }
        Ok(evicted)
    }

    pub async fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        let index = self.index.read().await;
        let mut keys: Vec<String> = index
            .tags
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub async fn tags_for_key(&self, key: &str) -> Vec<String> {
        let index = self.index.read().await;
        let mut tags: Vec<String> = index
            .keys
            .get(key)
            .map(|indexed| indexed.tags.iter().cloned().collect())
            .unwrap_or_default();
        tags.sort();
        tags
    }

    /// Drop expired entries from the store and the tag index.
    pub async fn sweep_expired(&self) -> CacheResult<usize> {
        // Held across the purge so a key re-set meanwhile is indexed after it.
        let mut index = self.index.write().await;
        let expired = self.store.purge_expired().await?;
        if expired.is_empty() {
            return Ok(0);
        }

        for key in &expired {
            index.forget_key(key);
        }
        tracing::debug!(purged = expired.len(), "Expired cache entries purged");
        Ok(expired.len())
    }

    /// Run [`sweep_expired`](Self::sweep_expired) on the sweep interval.
    pub fn start_expiry_sweep(self: &Arc<Self>) -> bool {
        let cache: Weak<Self> = Arc::downgrade(self);
        self.sweeper.start(move || {
            let cache = cache.clone();
            async move {
                if let Some(cache) = cache.upgrade()
                    && let Err(e) = cache.sweep_expired().await
                {
                    tracing::warn!(error = %e, "Cache expiry sweep failed");
                }
            }
        })
    }

    pub async fn stop_expiry_sweep(&self) {
        self.sweeper.stop().await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}
