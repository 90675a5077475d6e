//! Cache store trait definition.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Key/value backend holding serialized entries with optional TTLs.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a JSON value from the cache.
    ///
    /// Returns `Ok(None)` for a missing or expired key.
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a JSON value in the cache, replacing any previous value.
    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Clear all keys from the cache.
    ///
    /// **Warning:** This affects every tenant.
    async fn clear(&self) -> CacheResult<()>;

    /// Remaining time-to-live of a key.
    ///
    /// Returns `Ok(None)` if the key has no expiration or doesn't exist.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Drop expired entries and return their keys.
    ///
    /// Backends that expire keys on their own return an empty list.
    async fn purge_expired(&self) -> CacheResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Delete multiple keys in parallel.
    ///
    /// # Examples
    ///
    /// ```
    /// # use citadel_cache::*;
    /// # tokio_test::block_on(async {
    /// let cache = MemoryCacheStore::new();
    /// cache.set_json("session:1", "{}".to_string(), None).await.unwrap();
    /// cache.delete_many(&["session:1", "session:2"]).await.unwrap();
    /// assert!(!cache.exists("session:1").await.unwrap());
    /// # });
    /// ```
    async fn delete_many(&self, keys: &[&str]) -> CacheResult<()> {
        use futures::future::try_join_all;

        let futures = keys.iter().map(|key| self.delete(key));
        try_join_all(futures).await?;
        Ok(())
    }

    /// Get multiple keys in parallel, in input order.
    async fn get_many(&self, keys: &[&str]) -> CacheResult<Vec<Option<String>>> {
        use futures::future::try_join_all;

        let futures = keys.iter().map(|key| self.get_json(key));
        try_join_all(futures).await
    }
}
