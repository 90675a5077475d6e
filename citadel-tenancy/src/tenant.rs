//! Tenant records as held by the tenant directory.

use serde::{Deserialize, Serialize};

/// Service tier. Dedicated tenants get their own database and a larger pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TenantTier {
    #[default]
    Standard,
    Dedicated,
}

impl std::fmt::Display for TenantTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TenantTier::Standard => write!(f, "standard"),
            TenantTier::Dedicated => write!(f, "dedicated"),
        }
    }
}

/// How long the tenant's audit trail must be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    #[default]
    Standard,
    Compliance,
}

/// Connection details for a dedicated tenant database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default)]
    pub tls: bool,
}

impl DatabaseCredentials {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            tls: false,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }
}

impl std::fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Tenant information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique tenant identifier, also its subdomain label
    pub id: String,

    pub tier: TenantTier,

    pub retention: RetentionClass,

    /// Only meaningful for [`TenantTier::Dedicated`]
    pub dedicated_db: Option<DatabaseCredentials>,

    /// Inactive tenants resolve as not found
    pub active: bool,
}

impl Tenant {
    /// Create an active standard-tier tenant
    ///
    /// # Examples
    ///
    /// ```
    /// use citadel_tenancy::{Tenant, TenantTier};
    ///
    /// let tenant = Tenant::new("acme");
    /// assert_eq!(tenant.tier, TenantTier::Standard);
    /// assert!(tenant.active);
    /// ```
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tier: TenantTier::Standard,
            retention: RetentionClass::Standard,
            dedicated_db: None,
            active: true,
        }
    }

    /// Make this a dedicated tenant with its own database
    pub fn dedicated(mut self, credentials: DatabaseCredentials) -> Self {
        self.tier = TenantTier::Dedicated;
        self.dedicated_db = Some(credentials);
        self
    }

    pub fn with_retention(mut self, retention: RetentionClass) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedicated_builder() {
        let tenant = Tenant::new("globex")
            .dedicated(DatabaseCredentials::new("db-globex", 5432, "globex", "pw", "globex"))
            .with_retention(RetentionClass::Compliance);

        assert_eq!(tenant.tier, TenantTier::Dedicated);
        assert_eq!(tenant.retention, RetentionClass::Compliance);
        assert_eq!(tenant.dedicated_db.unwrap().host, "db-globex");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = DatabaseCredentials::new("h", 1, "u", "s3cret", "d");
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_value(Tenant::new("a").with_retention(RetentionClass::Compliance))
            .unwrap();
        assert_eq!(json["tier"], "standard");
        assert_eq!(json["retention"], "compliance");
    }
}
