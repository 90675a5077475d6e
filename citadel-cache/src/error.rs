//! Error types for cache operations.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// Bad tag template or store configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Other(String),
}

impl From<citadel_core::CanonicalError> for CacheError {
    fn from(err: citadel_core::CanonicalError) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
