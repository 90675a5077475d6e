//! Cache key construction.
//!
//! A key is the operation name plus the SHA-256 of the canonically encoded
//! arguments, prefixed with the tenant when there is one:
//! `tenant:{tenant}:{operation}:{digest}`. Identical calls for one tenant
//! collide; calls for different tenants never do.

use crate::error::CacheResult;
use citadel_core::canonical;
use serde::Serialize;

/// Build a cache key for a tenant-scoped operation.
///
/// # Examples
///
/// ```
/// use citadel_cache::cache_key;
/// use serde_json::json;
///
/// let a = cache_key(Some("acme"), "clients.list", &json!({"page": 1, "q": "x"})).unwrap();
/// let b = cache_key(Some("acme"), "clients.list", &json!({"q": "x", "page": 1})).unwrap();
/// assert_eq!(a, b);
/// assert!(a.starts_with("tenant:acme:clients.list:"));
/// ```
pub fn cache_key<A: Serialize + ?Sized>(
    tenant_id: Option<&str>,
    operation: &str,
    args: &A,
) -> CacheResult<String> {
    let digest = canonical::digest(args)?;
    Ok(match tenant_id {
        Some(tenant) => format!("tenant:{}:{}:{}", tenant, operation, digest),
        None => format!("{}:{}", operation, digest),
    })
}

/// Builder for keys whose arguments are collected one at a time.
#[derive(Debug, Clone)]
pub struct CacheKey {
    tenant_id: Option<String>,
    operation: String,
    args: Vec<serde_json::Value>,
}

impl CacheKey {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            tenant_id: None,
            operation: operation.into(),
            args: Vec::new(),
        }
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Append a positional argument.
    pub fn arg<A: Serialize + ?Sized>(mut self, arg: &A) -> CacheResult<Self> {
        let value = serde_json::to_value(arg)
            .map_err(|e| crate::error::CacheError::Serialization(e.to_string()))?;
        self.args.push(value);
        Ok(self)
    }

    pub fn build(&self) -> CacheResult<String> {
        cache_key(self.tenant_id.as_deref(), &self.operation, &self.args)
    }
}
