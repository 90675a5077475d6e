//! Per-tenant connection pool configuration.

use crate::tenant::TenantTier;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pool bounds and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSizing {
    /// Connections kept warm
    pub min: usize,
    /// Upper bound on live connections
    pub max: usize,
    /// Idle connections above `min` are closed after this long
    pub idle_timeout: Duration,
    /// Budget for opening a single connection
    pub connect_timeout: Duration,
}

impl PoolSizing {
    /// Sizing policy by tier.
    ///
    /// | tier | min | max | idle | connect |
    /// |---|---|---|---|---|
    /// | standard | 2 | 10 | 30s | 5s |
    /// | dedicated | 5 | 50 | 60s | 10s |
    ///
    /// ```
    /// use citadel_tenancy::{PoolSizing, TenantTier};
    ///
    /// let sizing = PoolSizing::for_tier(TenantTier::Dedicated);
    /// assert_eq!((sizing.min, sizing.max), (5, 50));
    /// ```
    pub const fn for_tier(tier: TenantTier) -> Self {
        match tier {
            TenantTier::Standard => Self {
                min: 2,
                max: 10,
                idle_timeout: Duration::from_secs(30),
                connect_timeout: Duration::from_secs(5),
            },
            TenantTier::Dedicated => Self {
                min: 5,
                max: 50,
                idle_timeout: Duration::from_secs(60),
                connect_timeout: Duration::from_secs(10),
            },
        }
    }

    /// Replace the bounds, keeping the timeouts
    pub fn with_bounds(mut self, min: usize, max: usize) -> Self {
        self.min = min;
        self.max = max;
        self
    }
}

/// Everything needed to open connections for one tenant.
///
/// Immutable after resolution; only the sizing bounds may change at runtime
/// through the pool's `resize`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantPoolConfig {
    pub tenant_id: String,
    pub tier: TenantTier,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub tls: bool,
    pub sizing: PoolSizing,
}

impl TenantPoolConfig {
    /// `host:port/database`, safe for logging
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl std::fmt::Debug for TenantPoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantPoolConfig")
            .field("tenant_id", &self.tenant_id)
            .field("tier", &self.tier)
            .field("endpoint", &self.endpoint())
            .field("user", &self.user)
            .field("tls", &self.tls)
            .field("sizing", &self.sizing)
            .finish()
    }
}
