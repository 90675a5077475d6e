// Environment variable overrides

use serde_json::{Map, Value};
use std::env;

/// Separator between nesting levels in an override name.
pub const NESTING_SEPARATOR: &str = "__";

/// Turns prefixed environment variables into a settings overlay.
///
/// `CITADEL_POOL__ACQUIRE_TIMEOUT_MS=2000` becomes
/// `{"pool": {"acquire_timeout_ms": 2000}}`. Variables without a nesting
/// separator (such as `CITADEL_LOG`) are left alone.
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build an overlay from the process environment.
    pub fn load(&self) -> Value {
        self.from_vars(env::vars())
    }

    /// Build an overlay from an explicit set of variables.
    pub fn from_vars<I>(&self, vars: I) -> Value
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut root = Map::new();
        let head = format!("{}_", self.prefix);

        for (key, raw) in vars {
            let Some(rest) = key.strip_prefix(&head) else {
                continue;
            };
            if !rest.contains(NESTING_SEPARATOR) {
                continue;
            }

            let path: Vec<String> = rest
                .split(NESTING_SEPARATOR)
                .map(str::to_lowercase)
                .collect();
            if path.iter().any(String::is_empty) {
                tracing::warn!(variable = %key, "Ignoring malformed settings override");
                continue;
            }

            insert_path(&mut root, &path, parse_scalar(&raw));
        }

        Value::Object(root)
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new("CITADEL")
    }
}

fn insert_path(map: &mut Map<String, Value>, path: &[String], value: Value) {
    let (last, parents) = match path.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = map;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(next) => current = next,
            _ => return,
        }
    }
    current.insert(last.clone(), value);
}

/// Numbers, booleans and JSON arrays/objects are typed; anything else stays a
/// string.
fn parse_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::String(String::new());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Array(_) | Value::Object(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}
