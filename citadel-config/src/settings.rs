//! Typed settings tree.
//!
//! Every section has defaults, so an empty document is a valid configuration
//! for local development.

use crate::validation::{ConfigValidator, Validate};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tenancy: TenancySettings,
    pub pool: PoolSettings,
    pub audit: AuditSettings,
    pub cache: CacheSettings,
    pub cdn: CdnSettings,
    pub log: LogSettings,
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        self.tenancy.validate()?;
        self.pool.validate()?;
        self.audit.validate()?;
        self.cache.validate()?;
        self.cdn.validate()?;
        self.log.validate()
    }
}

/// Host routing and the shared database used by standard-tier tenants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancySettings {
    /// Domain under which `{tenant}.{base_domain}` routes.
    pub base_domain: String,
    /// Labels under the base domain that never route to a tenant.
    pub reserved_subdomains: Vec<String>,
    pub shared_database: DatabaseSettings,
}

impl Default for TenancySettings {
    fn default() -> Self {
        Self {
            base_domain: "citadel.localhost".to_string(),
            reserved_subdomains: ["www", "api", "admin", "app", "mail", "status"]
                .into_iter()
                .map(String::from)
                .collect(),
            shared_database: DatabaseSettings::default(),
        }
    }
}

impl Validate for TenancySettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::is_hostname(&self.base_domain, "tenancy.base_domain")?;
        for label in &self.reserved_subdomains {
            ConfigValidator::not_empty(label, "tenancy.reserved_subdomains")?;
        }
        self.shared_database.validate()
    }
}

/// Database endpoint and credentials.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub tls: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "citadel".to_string(),
            password: String::new(),
            database: "citadel".to_string(),
            tls: false,
        }
    }
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("tls", &self.tls)
            .finish()
    }
}

impl Validate for DatabaseSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.host, "database.host")?;
        ConfigValidator::is_port(self.port, "database.port")?;
        ConfigValidator::not_empty(&self.user, "database.user")?;
        ConfigValidator::not_empty(&self.database, "database.database")
    }
}

/// Connection pool registry timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// How long `get_connection` waits for a free slot.
    pub acquire_timeout_ms: u64,
    /// Interval of the idle-eviction sweep.
    pub eviction_interval_secs: u64,
    /// A pool with no activity for this long is torn down.
    pub teardown_grace_secs: u64,
    /// How long shutdown waits for in-flight leases.
    pub drain_grace_secs: u64,
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_secs(self.teardown_grace_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 5_000,
            eviction_interval_secs: 30,
            teardown_grace_secs: 600,
            drain_grace_secs: 30,
        }
    }
}

impl Validate for PoolSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::positive(self.acquire_timeout_ms, "pool.acquire_timeout_ms")?;
        ConfigValidator::positive(self.eviction_interval_secs, "pool.eviction_interval_secs")?;
        ConfigValidator::positive(self.teardown_grace_secs, "pool.teardown_grace_secs")
    }
}

/// Ledger retention and outbox dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub retention_sweep_interval_secs: u64,
    pub standard_retention_days: u32,
    pub compliance_retention_days: u32,
    pub outbox_max_attempts: u32,
    pub outbox_poll_interval_ms: u64,
    pub outbox_base_backoff_ms: u64,
    /// Directory of the file-backed ledger; in-memory when unset.
    pub ledger_dir: Option<PathBuf>,
}

impl AuditSettings {
    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_interval_secs)
    }

    pub fn outbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.outbox_poll_interval_ms)
    }

    pub fn outbox_base_backoff(&self) -> Duration {
        Duration::from_millis(self.outbox_base_backoff_ms)
    }
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            retention_sweep_interval_secs: 86_400,
            standard_retention_days: 365,
            compliance_retention_days: 2555,
            outbox_max_attempts: 5,
            outbox_poll_interval_ms: 1_000,
            outbox_base_backoff_ms: 500,
            ledger_dir: None,
        }
    }
}

impl Validate for AuditSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::positive(
            self.retention_sweep_interval_secs,
            "audit.retention_sweep_interval_secs",
        )?;
        ConfigValidator::positive(
            u64::from(self.standard_retention_days),
            "audit.standard_retention_days",
        )?;
        if self.compliance_retention_days < self.standard_retention_days {
            return Err(crate::ConfigError::invalid(
                "audit.compliance_retention_days",
                "cannot be shorter than standard retention",
            ));
        }
        ConfigValidator::in_range(self.outbox_max_attempts, 1, 100, "audit.outbox_max_attempts")?;
        ConfigValidator::positive(self.outbox_poll_interval_ms, "audit.outbox_poll_interval_ms")
    }
}

/// Read cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_secs: u64,
    pub expiry_sweep_interval_secs: u64,
    /// Extra or replacement entity → tag templates, e.g.
    /// `{"Client": ["clients:{tenant}", "client:{tenant}:{id}"]}`.
    pub entity_tags: BTreeMap<String, Vec<String>>,
    /// Shared Redis store; the in-memory store is used when unset.
    pub redis_url: Option<String>,
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_interval_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            expiry_sweep_interval_secs: 60,
            entity_tags: BTreeMap::new(),
            redis_url: None,
        }
    }
}

impl Validate for CacheSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::positive(self.default_ttl_secs, "cache.default_ttl_secs")?;
        ConfigValidator::positive(
            self.expiry_sweep_interval_secs,
            "cache.expiry_sweep_interval_secs",
        )?;
        if let Some(url) = &self.redis_url
            && !url.starts_with("redis://")
            && !url.starts_with("rediss://")
        {
            return Err(crate::ConfigError::invalid(
                "cache.redis_url",
                "must use the redis:// or rediss:// scheme",
            ));
        }
        for (entity, templates) in &self.entity_tags {
            ConfigValidator::not_empty(entity, "cache.entity_tags")?;
            for template in templates {
                ConfigValidator::not_empty(template, "cache.entity_tags")?;
            }
        }
        Ok(())
    }
}

/// Query string rule names accepted in [`CachePolicySettings::query`].
pub const QUERY_RULES: &[&str] = &["include-all", "exclude-all", "include-list", "exclude-list"];

/// One row of the response cache policy table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePolicySettings {
    /// Path glob, e.g. `/static/*` or `/api/*/pricelist`.
    pub pattern: String,
    pub ttl_secs: u64,
    #[serde(default = "default_query_rule")]
    pub query: String,
    /// Parameters for the `include-list`/`exclude-list` rules.
    #[serde(default)]
    pub query_params: Vec<String>,
}

fn default_query_rule() -> String {
    "include-all".to_string()
}

impl Validate for CachePolicySettings {
    fn validate(&self) -> Result<()> {
        if !self.pattern.starts_with('/') {
            return Err(crate::ConfigError::invalid(
                "cdn.policies.pattern",
                format!("must start with '/' (got {:?})", self.pattern),
            ));
        }
        ConfigValidator::one_of(&self.query, QUERY_RULES, "cdn.policies.query")?;
        if self.query.ends_with("-list") && self.query_params.is_empty() {
            return Err(crate::ConfigError::invalid(
                "cdn.policies.query_params",
                format!("required by the {} rule", self.query),
            ));
        }
        Ok(())
    }
}

/// Edge CDN purge client.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdnSettings {
    pub enabled: bool,
    /// Purge API endpoint.
    pub endpoint: Option<String>,
    pub api_token: Option<String>,
    /// Public base URL used by `build_url`.
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub queue_capacity: usize,
    pub policies: Vec<CachePolicySettings>,
}

impl CdnSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CdnSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            api_token: None,
            base_url: "http://localhost".to_string(),
            timeout_ms: 10_000,
            max_attempts: 3,
            queue_capacity: 256,
            policies: Vec::new(),
        }
    }
}

impl std::fmt::Debug for CdnSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdnSettings")
            .field("enabled", &self.enabled)
            .field("endpoint", &self.endpoint)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_attempts", &self.max_attempts)
            .field("queue_capacity", &self.queue_capacity)
            .field("policies", &self.policies)
            .finish()
    }
}

impl Validate for CdnSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::is_url(&self.base_url, "cdn.base_url")?;
        if self.enabled {
            let endpoint = self.endpoint.as_deref().ok_or_else(|| {
                crate::ConfigError::invalid("cdn.endpoint", "required when the CDN is enabled")
            })?;
            ConfigValidator::is_url(endpoint, "cdn.endpoint")?;
        }
        ConfigValidator::positive(self.timeout_ms, "cdn.timeout_ms")?;
        ConfigValidator::in_range(self.max_attempts, 1, 20, "cdn.max_attempts")?;
        ConfigValidator::in_range(self.queue_capacity, 1, 65_536, "cdn.queue_capacity")?;
        self.policies.iter().try_for_each(Validate::validate)
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directive, overridden by `CITADEL_LOG`.
    pub level: String,
    /// `pretty`, `compact` or `json`.
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Validate for LogSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.level, "log.level")?;
        ConfigValidator::one_of(&self.format, &["pretty", "compact", "json"], "log.format")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.audit.standard_retention_days, 365);
        assert_eq!(settings.audit.compliance_retention_days, 2555);
        assert_eq!(settings.pool.acquire_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_enabled_cdn_requires_endpoint() {
        let mut settings = Settings::default();
        settings.cdn.enabled = true;
        assert!(settings.validate().is_err());

        settings.cdn.endpoint = Some("https://api.cdn.test/purge".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_policy_list_rule_requires_params() {
        let policy = CachePolicySettings {
            pattern: "/api/*".to_string(),
            ttl_secs: 60,
            query: "include-list".to_string(),
            query_params: vec![],
        };
        assert!(policy.validate().is_err());

        let policy = CachePolicySettings {
            query_params: vec!["page".to_string()],
            ..policy
        };
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_compliance_retention_not_shorter() {
        let mut settings = Settings::default();
        settings.audit.compliance_retention_days = 30;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut settings = Settings::default();
        settings.tenancy.shared_database.password = "hunter2".to_string();
        settings.cdn.api_token = Some("tok_secret".to_string());

        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("tok_secret"));
    }

    #[test]
    fn test_redis_url_scheme() {
        let mut settings = Settings::default();
        settings.cache.redis_url = Some("http://cache:6379".to_string());
        assert!(settings.validate().is_err());

        settings.cache.redis_url = Some("redis://cache:6379".to_string());
        assert!(settings.validate().is_ok());
    }
}
