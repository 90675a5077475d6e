//! Settings for the Citadel subsystem.
//!
//! Sources are layered in order, later layers overriding earlier ones:
//!
//! 1. built-in defaults
//! 2. settings files (TOML or JSON, detected by extension)
//! 3. a `.env` file, whose variables join the process environment
//! 4. `CITADEL_SECTION__FIELD` environment variables
//!
//! ```no_run
//! use citadel_config::SettingsLoader;
//!
//! let settings = SettingsLoader::new()
//!     .file("citadel.toml")
//!     .dotenv(true)
//!     .load()
//!     .unwrap();
//! println!("routing under {}", settings.tenancy.base_domain);
//! ```

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{FileFormat, FileLoader};
pub use settings::{
    AuditSettings, CachePolicySettings, CacheSettings, CdnSettings, DatabaseSettings,
    LogSettings, PoolSettings, Settings, TenancySettings,
};
pub use validation::{ConfigValidator, Validate};

use serde_json::Value;
use std::path::PathBuf;

/// Builder that layers settings sources and returns validated [`Settings`].
pub struct SettingsLoader {
    files: Vec<PathBuf>,
    load_dotenv: bool,
    dotenv_path: Option<PathBuf>,
    env_prefix: Option<String>,
    env_vars: Option<Vec<(String, String)>>,
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            load_dotenv: false,
            dotenv_path: None,
            env_prefix: Some("CITADEL".to_string()),
            env_vars: None,
        }
    }

    /// Add a settings file. Files are applied in the order added.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Load `.env` from the working directory if present
    pub fn dotenv(mut self, enabled: bool) -> Self {
        self.load_dotenv = enabled;
        self
    }

    /// Load a specific `.env` file; missing files are an error
    pub fn dotenv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.load_dotenv = true;
        self.dotenv_path = Some(path.into());
        self
    }

    /// Change the environment prefix (default `CITADEL`)
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Skip environment overrides entirely
    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    /// Use these variables instead of the process environment
    pub fn env_vars<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env_vars = Some(vars.into_iter().collect());
        self
    }

    /// Merge all sources, deserialize, and validate
    pub fn load(self) -> Result<Settings> {
        let mut tree = serde_json::to_value(Settings::default())
            .map_err(|e| ConfigError::Shape(e.to_string()))?;

        for path in &self.files {
            let overlay = FileLoader::auto(path)?.load_file(path)?;
            tracing::debug!(path = %path.display(), "Applying settings file");
            loader::merge(&mut tree, overlay);
        }

        if self.load_dotenv {
            match &self.dotenv_path {
                Some(path) => {
                    dotenvy::from_path(path)
                        .map_err(|e| ConfigError::Dotenv {
                            path: path.clone(),
                            message: e.to_string(),
                        })?;
                }
                None => {
                    // A missing .env is normal outside development
                    dotenvy::dotenv().ok();
                }
            }
        }

        if let Some(prefix) = &self.env_prefix {
            let env_loader = EnvLoader::new(prefix.clone());
            let overlay = match self.env_vars {
                Some(vars) => env_loader.from_vars(vars),
                None => env_loader.load(),
            };
            if overlay.as_object().is_some_and(|m| !m.is_empty()) {
                tracing::debug!(prefix = %prefix, "Applying environment overrides");
            }
            loader::merge(&mut tree, overlay);
        }

        let settings = from_tree(tree)?;
        settings.validate()?;
        Ok(settings)
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn from_tree(tree: Value) -> Result<Settings> {
    serde_json::from_value(tree).map_err(|e| ConfigError::Shape(e.to_string()))
}
