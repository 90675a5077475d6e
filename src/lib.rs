//! Citadel: tenant resources and compliance for multi-tenant services.
//!
//! - **Tenant routing and pools** - [`citadel_tenancy`] resolves hosts to
//!   tenants; [`citadel_pool`] keeps one isolated connection pool per tenant
//! - **Audit ledger** - [`citadel_audit`] keeps an append-only, hash-chained
//!   record of every mutation per tenant
//! - **Read cache and CDN** - [`citadel_cache`] evicts by tag and
//!   [`citadel_cdn`] purges the edge
//!
//! [`Citadel`] wires the pieces together from [`Settings`]; every mutation goes
//! through [`AuditCacheBridge::record`].
//!
//! # Quick Start
//!
//! ```ignore
//! use citadel::prelude::*;
//!
//! let settings = SettingsLoader::new().file("citadel.toml").load()?;
//! citadel::telemetry::init(&settings.log)?;
//!
//! let citadel = Arc::new(Citadel::builder(settings, directory, Arc::new(PgFactory)).build().await?);
//! citadel.start();
//!
//! let mut conn = citadel.get_connection("acme").await?;
//! // ... write ...
//! citadel
//!     .record(AuditDraft::new("acme", AuditAction::Update, "Client").entity_id("c-1"))
//!     .await?;
//! ```

pub mod bridge;
pub mod context;
pub mod error;
pub mod telemetry;

pub use bridge::{AuditCacheBridge, MutationOutcome};
pub use context::{Citadel, CitadelBuilder, ShutdownReport};
pub use error::{Error, Result};

pub use citadel_audit;
pub use citadel_cache;
pub use citadel_cdn;
pub use citadel_config;
pub use citadel_core;
pub use citadel_pool;
pub use citadel_tenancy;

pub use citadel_config::Settings;

/// Common imports
pub mod prelude {
    pub use crate::{AuditCacheBridge, Citadel, CitadelBuilder, Error, MutationOutcome, Result};
    pub use citadel_audit::{AuditAction, AuditDraft, AuditEntry, AuditLedger, AuditQuery};
    pub use citadel_cache::{EntityTagMap, TaggedCache, cache_key};
    pub use citadel_cdn::{CdnClient, InvalidationCoordinator, PurgeRequest};
    pub use citadel_config::{Settings, SettingsLoader};
    pub use citadel_pool::{ConnectionFactory, PooledConnection};
    pub use citadel_tenancy::{InMemoryTenantDirectory, Tenant, TenantDirectory, TenantTier};
    pub use std::sync::Arc;
}
