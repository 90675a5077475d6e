//! Tracing subscriber setup.
//!
//! The filter comes from `CITADEL_LOG` when set, otherwise from
//! [`LogSettings::level`]. Output format is `pretty`, `compact` or `json`.

use crate::error::{Error, Result};
use citadel_config::LogSettings;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding a filter directive, e.g. `citadel_audit=debug,info`.
pub const LOG_ENV: &str = "CITADEL_LOG";

/// Build the filter for `settings`, preferring `CITADEL_LOG`.
pub fn env_filter(settings: &LogSettings) -> Result<EnvFilter> {
    match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&settings.level)
            .map_err(|e| Error::Config(format!("invalid log level {:?}: {}", settings.level, e))),
    }
}

/// Install the global subscriber.
///
/// Fails when the filter does not parse or a subscriber is already installed.
pub fn init(settings: &LogSettings) -> Result<()> {
    let filter = env_filter(settings)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match settings.format.as_str() {
        "json" => registry.with(fmt::layer().json()).try_init(),
        "pretty" => registry.with(fmt::layer().pretty()).try_init(),
        "compact" => registry.with(fmt::layer().compact()).try_init(),
        other => return Err(Error::Config(format!("unknown log format {:?}", other))),
    };
    installed.map_err(|e| Error::Config(e.to_string()))
}
