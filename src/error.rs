//! Error taxonomy shared by every Citadel operation.
//!
//! Component crates keep their own error enums; they convert into [`Error`]
//! at the crate boundary so callers match on one set of variants.

use citadel_audit::{LedgerError, OutboxError};
use citadel_cache::CacheError;
use citadel_cdn::CdnError;
use citadel_config::ConfigError;
use citadel_pool::PoolError;
use citadel_tenancy::TenantError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown or inactive tenant. Fatal to the request.
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    /// No pooled connection became free within the acquire timeout.
    #[error("Resources exhausted for tenant {tenant_id} after {timeout:?}")]
    ResourceExhausted { tenant_id: String, timeout: Duration },

    /// The audit chain failed verification. Never repaired automatically.
    #[error("Audit chain integrity violation for tenant {tenant_id}: {reason}")]
    ChainIntegrityViolation {
        tenant_id: String,
        entry_id: Option<String>,
        reason: String,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Cache or CDN invalidation failed. The originating write stands.
    #[error("Invalidation failed: {0}")]
    InvalidationFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether the caller may retry the same operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ResourceExhausted { .. }
                | Error::StorageUnavailable(_)
                | Error::InvalidationFailure(_)
        )
    }

    /// Whether the tenant itself is the problem, as opposed to infrastructure
    pub fn is_tenant_error(&self) -> bool {
        matches!(self, Error::TenantNotFound(_) | Error::InvalidInput(_))
    }
}

impl From<TenantError> for Error {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::NotFound(id) => Error::TenantNotFound(id),
            TenantError::Invalid(msg) => Error::InvalidInput(msg),
            TenantError::Storage(msg) => Error::StorageUnavailable(msg),
        }
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::TenantNotFound(id) => Error::TenantNotFound(id),
            PoolError::ResourceExhausted { tenant_id, timeout } => {
                Error::ResourceExhausted { tenant_id, timeout }
            }
            PoolError::InvalidSizing(msg) => Error::InvalidInput(msg),
            PoolError::Tenant(inner) => inner.into(),
            other @ (PoolError::Closed(_)
            | PoolError::Connect { .. }
            | PoolError::ConnectTimeout { .. }) => Error::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::StorageUnavailable(msg) => Error::StorageUnavailable(msg),
            LedgerError::ChainIntegrityViolation {
                tenant_id,
                entry_id,
                reason,
            } => Error::ChainIntegrityViolation {
                tenant_id,
                entry_id: entry_id.map(|id| id.to_string()),
                reason,
            },
            // Lost a race with another writer; the append can be retried.
            conflict @ LedgerError::Conflict { .. } => Error::StorageUnavailable(conflict.to_string()),
            LedgerError::Invalid(msg) => Error::InvalidInput(msg),
            LedgerError::Serialization(e) => Error::InvalidInput(e.to_string()),
        }
    }
}

impl From<OutboxError> for Error {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::Serialization(e) => Error::InvalidInput(e.to_string()),
            OutboxError::NotFound(id) => Error::InvalidInput(format!("outbox message {} not found", id)),
            other => Error::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Config(msg) => Error::Config(msg),
            other => Error::InvalidationFailure(other.to_string()),
        }
    }
}

impl From<CdnError> for Error {
    fn from(err: CdnError) -> Self {
        match err {
            CdnError::Config(msg) => Error::Config(msg),
            CdnError::InvalidUrl(e) => Error::Config(e.to_string()),
            other => Error::InvalidationFailure(other.to_string()),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
