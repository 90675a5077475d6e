//! Edge CDN invalidation for Citadel.
//!
//! # Features
//!
//! - **Purge requests** - URL list, tag (surrogate key) list or full purge
//! - **HTTP client** - [`HttpCdnClient`] posts purges with retry and backoff
//! - **Background queue** - [`InvalidationCoordinator`] keeps purges off the write path
//! - **Cache policies** - [`CachePolicyTable`] renders `Cache-Control` and normalises cache-key URLs
//!
//! # Examples
//!
//! ```
//! use citadel_cdn::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let client = Arc::new(RecordingCdnClient::new());
//! let coordinator = InvalidationCoordinator::spawn(client.clone(), 16);
//!
//! coordinator.schedule_tags(["clients:acme", "client:acme:c-1"]).unwrap();
//! coordinator.drain(Duration::from_secs(1)).await;
//!
//! assert_eq!(client.purged_tags(), vec!["clients:acme", "client:acme:c-1"]);
//! # });
//! ```

pub mod client;
pub mod coordinator;
pub mod error;
pub mod policy;
pub mod purge;
pub mod retry;

pub use client::{CdnClient, HttpCdnClient, NoopCdnClient, RecordingCdnClient};
pub use coordinator::{CoordinatorStats, InvalidationCoordinator};
pub use error::{CdnError, Result};
pub use policy::{CachePolicy, CachePolicyTable, CacheStrategy, QueryStringRule};
pub use purge::PurgeRequest;
pub use retry::RetryPolicy;
