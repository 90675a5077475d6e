//! CDN errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CdnError>;

/// Errors raised while building or delivering purge requests.
#[derive(Debug, Error)]
pub enum CdnError {
    /// Transport failure (connect, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The purge API answered with a non-success status
    #[error("CDN rejected purge with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid purge request: {0}")]
    InvalidRequest(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The invalidation queue is at capacity
    #[error("Invalidation queue full")]
    QueueFull,

    /// The coordinator has been shut down
    #[error("Invalidation queue closed")]
    QueueClosed,
}

impl CdnError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            CdnError::Http(e) => e.is_timeout() || e.is_connect(),
            CdnError::Status { status, .. } => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            CdnError::QueueFull => true,
            _ => false,
        }
    }
}
