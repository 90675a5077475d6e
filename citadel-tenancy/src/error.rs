//! Tenant errors

/// Tenant lookup and resolution errors
#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("Tenant not found: {0}")]
    NotFound(String),

    #[error("Invalid tenant identifier: {0}")]
    Invalid(String),

    #[error("Tenant directory unavailable: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, TenantError>;
