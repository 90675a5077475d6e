// Settings file loaders

use crate::{ConfigError, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Supported settings file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
}

impl FileFormat {
    pub fn name(&self) -> &'static str {
        match self {
            FileFormat::Json => "JSON",
            FileFormat::Toml => "TOML",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }
}

/// Parses a settings document into a JSON tree for merging.
pub struct FileLoader {
    format: FileFormat,
}

impl FileLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Detect the format from the file extension
    pub fn auto(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|s| s.to_str())
            .and_then(FileFormat::from_extension)
            .map(Self::new)
            .ok_or_else(|| ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
    }

    pub fn load_file(&self, path: &Path) -> Result<Value> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        self.parse_from(&content, &path.display().to_string())
    }

    pub fn parse(&self, content: &str) -> Result<Value> {
        self.parse_from(content, "inline settings")
    }

    fn parse_from(&self, content: &str, origin: &str) -> Result<Value> {
        let malformed = |message: String| ConfigError::Parse {
            origin: origin.to_string(),
            format: self.format.name(),
            message,
        };

        let value = match self.format {
            FileFormat::Json => serde_json::from_str(content).map_err(|e| malformed(e.to_string()))?,
            FileFormat::Toml => {
                let toml_value: toml::Value =
                    toml::from_str(content).map_err(|e| malformed(e.to_string()))?;
                serde_json::to_value(toml_value).map_err(|e| malformed(e.to_string()))?
            }
        };

        if !value.is_object() {
            return Err(malformed("top level must be a table".to_string()));
        }

        Ok(value)
    }
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any other
/// value in the overlay replaces the base value.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
