//! Canonical JSON encoding.
//!
//! Every value that feeds a hash or a cache key goes through this encoder so
//! the bytes are identical across processes, restarts, and implementations:
//!
//! - object keys are emitted in byte-wise ascending order, at every depth
//! - no insignificant whitespace
//! - strings use JSON escaping as produced by `serde_json`
//! - numbers use `serde_json`'s shortest round-trip representation
//! - `null` is written for absent optionals; fields are never skipped
//!
//! Changing any of these rules invalidates every stored audit hash.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonical encoding errors
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    #[error("Value cannot be represented as JSON: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Encode any serializable value canonically.
///
/// # Examples
///
/// ```
/// use citadel_core::canonical;
/// use serde_json::json;
///
/// let encoded = canonical::encode(&json!({"b": 1, "a": [true, null]})).unwrap();
/// assert_eq!(encoded, r#"{"a":[true,null],"b":1}"#);
/// ```
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalError> {
    let value = serde_json::to_value(value)?;
    Ok(encode_value(&value))
}

/// Encode an already-built JSON value canonically.
pub fn encode_value(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Lowercase hex SHA-256 of raw bytes.
///
/// ```
/// use citadel_core::canonical::sha256_hex;
///
/// assert_eq!(
///     sha256_hex(b"abc"),
///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
/// );
/// ```
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of the canonical encoding of `value`.
pub fn digest<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalError> {
    Ok(sha256_hex(encode(value)?.as_bytes()))
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            // Sort here instead of trusting the map type; `preserve_order`
            // may be enabled anywhere in the dependency graph.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_str(key, out);
                out.push(':');
                write_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_str(s, out),
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_str(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_owned()).to_string());
}
