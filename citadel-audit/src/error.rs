//! Ledger and outbox errors

use uuid::Uuid;

/// Audit ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Audit storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Audit chain for tenant {tenant_id} is broken at {entry_id:?}: {reason}")]
    ChainIntegrityViolation {
        tenant_id: String,
        entry_id: Option<Uuid>,
        reason: String,
    },

    #[error("Sequence {sequence} already taken or out of order for tenant {tenant_id}")]
    Conflict { tenant_id: String, sequence: u64 },

    #[error("Invalid audit entry: {0}")]
    Invalid(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StorageUnavailable(_))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::StorageUnavailable(err.to_string())
    }
}

impl From<citadel_core::CanonicalError> for LedgerError {
    fn from(err: citadel_core::CanonicalError) -> Self {
        LedgerError::Invalid(err.to_string())
    }
}

/// Outbox errors
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("Outbox unavailable: {0}")]
    Unavailable(String),

    #[error("Outbox message not found: {0}")]
    NotFound(Uuid),

    #[error("Outbox handler failed: {0}")]
    Handler(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
