//! Per-tenant connection pools.
//!
//! Every tenant gets an isolated pool sized by its tier. Pools are created on
//! first use behind a per-tenant creation lock, hand out [`PooledConnection`]
//! leases bounded by a semaphore, shed idle connections on a timer, and drain
//! gracefully on shutdown.
//!
//! ```ignore
//! let registry = Arc::new(PoolRegistry::new(resolver, Arc::new(MyDriver), RegistryOptions::default()));
//! registry.start_eviction();
//!
//! let mut conn = registry.get_connection("acme").await?;
//! conn.execute("UPDATE clients SET ...").await?;
//! // dropping the lease returns the connection
//! ```

pub mod error;
pub mod factory;
pub mod pool;
pub mod registry;

pub use error::PoolError;
pub use factory::{BoxError, ConnectionFactory};
pub use pool::{DrainOutcome, PoolStatus, PooledConnection, TenantPool};
pub use registry::{EvictionReport, PoolRegistry, RegistryOptions, RegistryStats};
