//! Read cache for Citadel.
//!
//! Values are stored with a TTL and indexed under one or more tags so a write
//! can evict everything derived from the entity it touched.
//!
//! # Features
//!
//! - `redis` - Redis-backed [`CacheStore`] shared between nodes
//! - **Tag-based invalidation** - [`TaggedCache::invalidate_by_tag`]
//! - **Explicit composition** - [`TaggedCache::remember`] instead of method decorators
//! - **Deterministic keys** - [`cache_key`] over canonically encoded arguments
//! - **Entity tags** - [`EntityTagMap`] from entity type to tag templates
//!
//! # Examples
//!
//! ```
//! use citadel_cache::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let cache = TaggedCache::new(Arc::new(MemoryCacheStore::new()));
//! let tags = EntityTagMap::new().tags_for("Client", "acme", Some("c-1"));
//! let tag_refs: Vec<&str> = tags.iter().map(String::as_str).collect();
//!
//! let key = cache_key(Some("acme"), "client.get", &["c-1"]).unwrap();
//! let name: Result<String, CacheError> = cache
//!     .remember(&key, Duration::from_secs(60), &tag_refs, || async {
//!         Ok("Acme Corp".to_string())
//!     })
//!     .await;
//! assert_eq!(name.unwrap(), "Acme Corp");
//!
//! assert_eq!(cache.invalidate_by_tag("clients:acme").await.unwrap(), 1);
//! # });
//! ```

pub mod error;
pub mod key;
pub mod memory;
pub mod tagged;
pub mod tags;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use error::{CacheError, CacheResult};
pub use key::{CacheKey, cache_key};
pub use memory::MemoryCacheStore;
pub use tagged::{CacheEntry, CacheStats, TaggedCache};
pub use tags::EntityTagMap;
pub use traits::CacheStore;

#[cfg(feature = "redis")]
pub use redis_store::RedisCacheStore;
