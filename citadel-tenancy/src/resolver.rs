//! Tenant Resolution
//!
//! Maps an inbound host to a tenant id, and a tenant id to the pool
//! configuration of its database.

use crate::directory::TenantDirectory;
use crate::error::{Result, TenantError};
use crate::pool_config::{PoolSizing, TenantPoolConfig};
use crate::tenant::{Tenant, TenantTier};
use citadel_config::{DatabaseSettings, TenancySettings};
use regex::Regex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};

static TENANT_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").expect("valid regex"));

/// Whether `id` is usable as a tenant identifier and subdomain label.
pub fn is_valid_tenant_id(id: &str) -> bool {
    TENANT_LABEL.is_match(id)
}

/// Resolves hosts to tenants and tenants to pool configuration.
pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
    base_domain: String,
    reserved: HashSet<String>,
    shared_database: DatabaseSettings,
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn TenantDirectory>, settings: &TenancySettings) -> Self {
        Self {
            directory,
            base_domain: normalize_host(&settings.base_domain),
            reserved: settings
                .reserved_subdomains
                .iter()
                .map(|label| label.to_ascii_lowercase())
                .collect(),
            shared_database: settings.shared_database.clone(),
        }
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Resolve the tenant serving `host`.
    ///
    /// `{label}.{base_domain}` resolves to `label` unless the label is
    /// reserved. Any other host must be a verified custom domain. No match is
    /// `Ok(None)`; only a directory failure is an error.
    pub async fn resolve_by_host(&self, host: &str) -> Result<Option<String>> {
        let host = normalize_host(host);
        if host.is_empty() || host == self.base_domain {
            return Ok(None);
        }
        if host.parse::<IpAddr>().is_ok() {
            tracing::debug!(host = %host, "IP literal host, no tenant");
            return Ok(None);
        }

        if let Some(label) = host
            .strip_suffix(self.base_domain.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
            && !label.contains('.')
        {
            if self.reserved.contains(label) || !is_valid_tenant_id(label) {
                tracing::debug!(host = %host, "Unrouted subdomain");
                return Ok(None);
            }
            return Ok(Some(label.to_string()));
        }

        let tenant = self.directory.lookup_verified_domain(&host).await?;
        if tenant.is_none() {
            tracing::debug!(host = %host, "No verified domain for host");
        }
        Ok(tenant)
    }

    /// Look up an active tenant.
    pub async fn tenant(&self, tenant_id: &str) -> Result<Tenant> {
        if !is_valid_tenant_id(tenant_id) {
            return Err(TenantError::Invalid(tenant_id.to_string()));
        }

        match self.directory.lookup_tenant(tenant_id).await? {
            Some(tenant) if tenant.active => Ok(tenant),
            Some(_) => {
                tracing::debug!(tenant = %tenant_id, "Tenant is inactive");
                Err(TenantError::NotFound(tenant_id.to_string()))
            }
            None => Err(TenantError::NotFound(tenant_id.to_string())),
        }
    }

    /// Build the pool configuration for a tenant.
    ///
    /// Dedicated tenants use their own credentials; standard tenants share the
    /// configured database endpoint.
    pub async fn resolve_config(&self, tenant_id: &str) -> Result<TenantPoolConfig> {
        let tenant = self.tenant(tenant_id).await?;
        let sizing = PoolSizing::for_tier(tenant.tier);

        let config = match (tenant.tier, tenant.dedicated_db) {
            (TenantTier::Dedicated, Some(db)) => TenantPoolConfig {
                tenant_id: tenant.id,
                tier: TenantTier::Dedicated,
                host: db.host,
                port: db.port,
                user: db.user,
                password: db.password,
                database: db.database,
                tls: db.tls,
                sizing,
            },
            (TenantTier::Dedicated, None) => {
                return Err(TenantError::Invalid(format!(
                    "dedicated tenant {} has no database credentials",
                    tenant_id
                )));
            }
            (TenantTier::Standard, _) => {
                let shared = &self.shared_database;
                TenantPoolConfig {
                    tenant_id: tenant.id,
                    tier: TenantTier::Standard,
                    host: shared.host.clone(),
                    port: shared.port,
                    user: shared.user.clone(),
                    password: shared.password.clone(),
                    database: shared.database.clone(),
                    tls: shared.tls,
                    sizing,
                }
            }
        };

        tracing::debug!(tenant = %config.tenant_id, endpoint = %config.endpoint(), "Resolved pool config");
        Ok(config)
    }
}

/// Lowercase, drop any port and a trailing dot. IPv6 literals come back
/// without brackets.
fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else if host.matches(':').nth(1).is_some() {
        // Bare IPv6 literal; it has no port to strip
        host
    } else {
        host.rsplit_once(':').map_or(host, |(name, _port)| name)
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryTenantDirectory;
    use crate::tenant::DatabaseCredentials;

    fn resolver(dir: InMemoryTenantDirectory) -> TenantResolver {
        let settings = TenancySettings {
            base_domain: "citadel.test".to_string(),
            ..TenancySettings::default()
        };
        TenantResolver::new(Arc::new(dir), &settings)
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("Acme.Citadel.Test:8443"), "acme.citadel.test");
        assert_eq!(normalize_host("acme.citadel.test."), "acme.citadel.test");
        assert_eq!(normalize_host("[::1]:8080"), "::1");
        assert_eq!(normalize_host("2001:DB8::1"), "2001:db8::1");
        assert_eq!(normalize_host("fe80::1"), "fe80::1");
    }

    #[tokio::test]
    async fn test_ip_literal_hosts_resolve_to_no_tenant() {
        let r = resolver(InMemoryTenantDirectory::new());
        for host in ["2001:db8::1", "[2001:db8::1]:443", "10.0.0.7:8080", "::1"] {
            assert_eq!(r.resolve_by_host(host).await.unwrap(), None, "{host}");
        }
    }

    #[test]
    fn test_tenant_id_validation() {
        assert!(is_valid_tenant_id("acme"));
        assert!(is_valid_tenant_id("acme-2"));
        assert!(!is_valid_tenant_id("-acme"));
        assert!(!is_valid_tenant_id("Acme"));
        assert!(!is_valid_tenant_id("../etc"));
        assert!(!is_valid_tenant_id(""));
    }

    #[tokio::test]
    async fn test_subdomain_resolution() {
        let r = resolver(InMemoryTenantDirectory::new());

        assert_eq!(
            r.resolve_by_host("acme.citadel.test:443").await.unwrap(),
            Some("acme".to_string())
        );
        assert_eq!(r.resolve_by_host("www.citadel.test").await.unwrap(), None);
        assert_eq!(r.resolve_by_host("citadel.test").await.unwrap(), None);
        assert_eq!(r.resolve_by_host("a.b.citadel.test").await.unwrap(), None);
        // suffix match must be on a label boundary
        assert_eq!(r.resolve_by_host("evilcitadel.test").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_custom_domain_requires_verification() {
        let dir = InMemoryTenantDirectory::new();
        dir.upsert(Tenant::new("acme"));
        dir.claim_domain("portal.acme.com", "acme");
        let dir = Arc::new(dir);
        let settings = TenancySettings::default();
        let r = TenantResolver::new(dir.clone(), &settings);

        assert_eq!(r.resolve_by_host("portal.acme.com").await.unwrap(), None);
        dir.verify_domain("portal.acme.com");
        assert_eq!(
            r.resolve_by_host("Portal.Acme.com.").await.unwrap(),
            Some("acme".to_string())
        );
    }

    #[tokio::test]
    async fn test_standard_tenant_uses_shared_database() {
        let dir = InMemoryTenantDirectory::new();
        dir.upsert(Tenant::new("acme"));
        let r = resolver(dir);

        let config = r.resolve_config("acme").await.unwrap();
        assert_eq!(config.tier, TenantTier::Standard);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.sizing, PoolSizing::for_tier(TenantTier::Standard));
    }

    #[tokio::test]
    async fn test_dedicated_tenant_uses_own_database() {
        let dir = InMemoryTenantDirectory::new();
        dir.upsert(
            Tenant::new("globex")
                .dedicated(DatabaseCredentials::new("db-globex", 6543, "g", "pw", "globex").with_tls(true)),
        );
        let r = resolver(dir);

        let config = r.resolve_config("globex").await.unwrap();
        assert_eq!(config.endpoint(), "db-globex:6543/globex");
        assert!(config.tls);
        assert_eq!(config.sizing.max, 50);
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_are_not_found() {
        let dir = InMemoryTenantDirectory::new();
        dir.upsert(Tenant::new("dormant").with_active(false));
        let r = resolver(dir);

        assert!(matches!(r.resolve_config("ghost").await, Err(TenantError::NotFound(_))));
        assert!(matches!(r.resolve_config("dormant").await, Err(TenantError::NotFound(_))));
        assert!(matches!(r.resolve_config("Bad Id").await, Err(TenantError::Invalid(_))));
    }
}
