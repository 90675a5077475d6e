//! Tenant directory.
//!
//! The directory is the system of record for tenants and their custom domains.
//! Production deployments back it with the control-plane database; the
//! in-memory directory serves tests and single-node setups.

use crate::error::Result;
use crate::tenant::Tenant;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Read access to the tenant directory
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Find a tenant by id, including inactive tenants
    async fn lookup_tenant(&self, id: &str) -> Result<Option<Tenant>>;

    /// Find the tenant owning a **verified** custom domain
    async fn lookup_verified_domain(&self, host: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
struct DomainClaim {
    tenant_id: String,
    verified: bool,
}

/// In-memory tenant directory
#[derive(Debug, Default)]
pub struct InMemoryTenantDirectory {
    tenants: RwLock<HashMap<String, Tenant>>,
    domains: RwLock<HashMap<String, DomainClaim>>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tenant
    pub fn upsert(&self, tenant: Tenant) {
        self.tenants.write().insert(tenant.id.clone(), tenant);
    }

    pub fn remove(&self, id: &str) -> Option<Tenant> {
        self.domains.write().retain(|_, claim| claim.tenant_id != id);
        self.tenants.write().remove(id)
    }

    /// Register a custom domain claim; it does not route until verified
    pub fn claim_domain(&self, host: &str, tenant_id: impl Into<String>) {
        self.domains.write().insert(
            host.to_ascii_lowercase(),
            DomainClaim {
                tenant_id: tenant_id.into(),
                verified: false,
            },
        );
    }

    /// Mark a claimed domain as verified. Returns `false` if it was never claimed.
    pub fn verify_domain(&self, host: &str) -> bool {
        match self.domains.write().get_mut(&host.to_ascii_lowercase()) {
            Some(claim) => {
                claim.verified = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn lookup_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        Ok(self.tenants.read().get(id).cloned())
    }

    async fn lookup_verified_domain(&self, host: &str) -> Result<Option<String>> {
        Ok(self
            .domains
            .read()
            .get(host)
            .filter(|claim| claim.verified)
            .map(|claim| claim.tenant_id.clone()))
    }
}
