//! Multi-tenancy for Citadel
//!
//! - [`TenantDirectory`] - system of record for tenants and custom domains
//! - [`TenantResolver`] - host → tenant id, tenant id → [`TenantPoolConfig`]
//! - [`PoolSizing`] - pool bounds as a pure function of [`TenantTier`]
//!
//! # Quick Start
//!
//! ```
//! use citadel_config::TenancySettings;
//! use citadel_tenancy::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let directory = InMemoryTenantDirectory::new();
//! directory.upsert(Tenant::new("acme"));
//!
//! let settings = TenancySettings {
//!     base_domain: "example.com".to_string(),
//!     ..TenancySettings::default()
//! };
//! let resolver = TenantResolver::new(Arc::new(directory), &settings);
//!
//! let tenant = resolver.resolve_by_host("acme.example.com").await.unwrap();
//! assert_eq!(tenant.as_deref(), Some("acme"));
//!
//! let config = resolver.resolve_config("acme").await.unwrap();
//! assert_eq!(config.sizing.max, 10);
//! # });
//! ```

pub mod directory;
pub mod error;
pub mod pool_config;
pub mod resolver;
pub mod tenant;

pub use directory::{InMemoryTenantDirectory, TenantDirectory};
pub use error::TenantError;
pub use pool_config::{PoolSizing, TenantPoolConfig};
pub use resolver::{TenantResolver, is_valid_tenant_id};
pub use tenant::{DatabaseCredentials, RetentionClass, Tenant, TenantTier};
