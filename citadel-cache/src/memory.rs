//! In-memory cache store.

use crate::error::CacheResult;
use crate::traits::CacheStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process TTL store.
///
/// Expired entries read as a miss and are removed on that read; the rest are
/// reclaimed by [`CacheStore::purge_expired`].
#[derive(Default)]
pub struct MemoryCacheStore {
    data: RwLock<HashMap<String, StoredValue>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        {
            let data = self.data.read().await;
            match data.get(key) {
                None => return Ok(None),
                Some(stored) if !stored.is_expired(now) => return Ok(Some(stored.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: remove unless a writer replaced it in between.
        let mut data = self.data.write().await;
        if data.get(key).is_some_and(|stored| stored.is_expired(now)) {
            data.remove(key);
        }
        Ok(None)
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.data
            .write()
            .await
            .insert(key.to_string(), StoredValue { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .data
            .read()
            .await
            .get(key)
            .is_some_and(|stored| !stored.is_expired(now)))
    }

    async fn clear(&self) -> CacheResult<()> {
        self.data.write().await.clear();
        Ok(())
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .data
            .read()
            .await
            .get(key)
            .filter(|stored| !stored.is_expired(now))
            .and_then(|stored| stored.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn purge_expired(&self) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        let mut data = self.data.write().await;
        let expired: Vec<String> = data
            .iter()
            .filter(|(_, stored)| stored.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            data.remove(key);
        }
        Ok(expired)
    }

    async fn delete_many(&self, keys: &[&str]) -> CacheResult<()> {
        let mut data = self.data.write().await;
        for key in keys {
            data.remove(*key);
        }
        Ok(())
    }
}
