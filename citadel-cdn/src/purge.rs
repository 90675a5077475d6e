//! Purge requests.

use crate::error::{CdnError, Result};
use serde::{Deserialize, Serialize};

/// What to remove from the edge.
///
/// Exactly one form is used per request: a URL list, a tag (surrogate key)
/// list, or a full purge. Full purges are for administrative callers only;
/// the caller is responsible for checking that authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub purge_all: bool,
}

impl PurgeRequest {
    /// Purge specific URLs.
    pub fn urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Purge everything carrying any of these tags.
    ///
    /// ```
    /// use citadel_cdn::PurgeRequest;
    ///
    /// let request = PurgeRequest::tags(["clients:acme"]);
    /// assert_eq!(serde_json::to_string(&request).unwrap(), r#"{"tags":["clients:acme"]}"#);
    /// ```
    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Purge the whole zone.
    pub fn all() -> Self {
        Self {
            purge_all: true,
            ..Self::default()
        }
    }

    pub fn is_purge_all(&self) -> bool {
        self.purge_all
    }

    /// Check that exactly one non-empty form is used.
    pub fn validate(&self) -> Result<()> {
        let forms = [!self.urls.is_empty(), !self.tags.is_empty(), self.purge_all]
            .into_iter()
            .filter(|set| *set)
            .count();

        match forms {
            0 => Err(CdnError::InvalidRequest("purge request is empty".to_string())),
            1 => {
                if self.urls.iter().chain(&self.tags).any(|s| s.trim().is_empty()) {
                    return Err(CdnError::InvalidRequest("blank url or tag".to_string()));
                }
                Ok(())
            }
            _ => Err(CdnError::InvalidRequest(
                "purge request mixes urls, tags and purge-all".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forms_validate() {
        assert!(PurgeRequest::urls(["https://cdn.example.com/a"]).validate().is_ok());
        assert!(PurgeRequest::tags(["clients:acme"]).validate().is_ok());
        assert!(PurgeRequest::all().validate().is_ok());
    }

    #[test]
    fn test_invalid_requests() {
        assert!(PurgeRequest::default().validate().is_err());
        assert!(PurgeRequest::tags(Vec::<String>::new()).validate().is_err());
        assert!(PurgeRequest::tags([" "]).validate().is_err());

        let mixed = PurgeRequest {
            tags: vec!["t".to_string()],
            purge_all: true,
            ..PurgeRequest::default()
        };
        assert!(mixed.validate().is_err());
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(PurgeRequest::all()).unwrap();
        assert_eq!(json, serde_json::json!({"purgeAll": true}));
    }
}
