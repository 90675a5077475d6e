//! Settings errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file extension names no supported format
    #[error("unsupported settings format for {}: expected .json or .toml", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON or TOML, or is not a table
    #[error("malformed {format} in {origin}: {message}")]
    Parse {
        origin: String,
        format: &'static str,
        message: String,
    },

    /// An explicitly requested `.env` file could not be applied
    #[error("cannot load dotenv file {}: {message}", path.display())]
    Dotenv { path: PathBuf, message: String },

    /// A merged value has the wrong type for its field
    #[error("settings do not match the expected shape: {0}")]
    Shape(String),

    /// A value is out of bounds or contradicts another setting
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Dotted name of the offending setting, for validation failures.
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
