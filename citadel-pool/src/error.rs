//! Pool errors

use citadel_tenancy::TenantError;
use std::time::Duration;

/// Connection pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("No connection available for tenant {tenant_id} within {timeout:?}")]
    ResourceExhausted { tenant_id: String, timeout: Duration },

    #[error("Pool for tenant {0} is closed")]
    Closed(String),

    #[error("Failed to connect for tenant {tenant_id}: {message}")]
    Connect { tenant_id: String, message: String },

    #[error("Connecting for tenant {tenant_id} timed out after {timeout:?}")]
    ConnectTimeout { tenant_id: String, timeout: Duration },

    #[error("Invalid pool sizing: {0}")]
    InvalidSizing(String),

    #[error(transparent)]
    Tenant(TenantError),
}

impl PoolError {
    /// Whether the caller may retry the same operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::ResourceExhausted { .. }
                | PoolError::Connect { .. }
                | PoolError::ConnectTimeout { .. }
                | PoolError::Closed(_)
        )
    }
}

impl From<TenantError> for PoolError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::NotFound(id) => PoolError::TenantNotFound(id),
            other => PoolError::Tenant(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
