//! Audit entry structures and the content hash.

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use citadel_core::canonical;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// `previousHash` of the first entry in every tenant's chain.
pub const SEED_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audited action. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    LoginFailed,
    PermissionChange,
    RoleChange,
    PasswordChange,
    MfaEnabled,
    MfaDisabled,
    Export,
    Download,
    Share,
    ApiKeyCreate,
    ApiKeyRevoke,
    SettingsChange,
    SubscriptionChange,
    UserInvite,
    UserRemove,
}

impl AuditAction {
    pub const ALL: [AuditAction; 19] = [
        AuditAction::Create,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::Login,
        AuditAction::LoginFailed,
        AuditAction::PermissionChange,
        AuditAction::RoleChange,
        AuditAction::PasswordChange,
        AuditAction::MfaEnabled,
        AuditAction::MfaDisabled,
        AuditAction::Export,
        AuditAction::Download,
        AuditAction::Share,
        AuditAction::ApiKeyCreate,
        AuditAction::ApiKeyRevoke,
        AuditAction::SettingsChange,
        AuditAction::SubscriptionChange,
        AuditAction::UserInvite,
        AuditAction::UserRemove,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Login => "login",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::PermissionChange => "permission_change",
            AuditAction::RoleChange => "role_change",
            AuditAction::PasswordChange => "password_change",
            AuditAction::MfaEnabled => "mfa_enabled",
            AuditAction::MfaDisabled => "mfa_disabled",
            AuditAction::Export => "export",
            AuditAction::Download => "download",
            AuditAction::Share => "share",
            AuditAction::ApiKeyCreate => "api_key_create",
            AuditAction::ApiKeyRevoke => "api_key_revoke",
            AuditAction::SettingsChange => "settings_change",
            AuditAction::SubscriptionChange => "subscription_change",
            AuditAction::UserInvite => "user_invite",
            AuditAction::UserRemove => "user_remove",
        }
    }

    /// Actions that change entity data and therefore invalidate caches
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            AuditAction::Create | AuditAction::Update | AuditAction::Delete
        )
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed ledger entry. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant_id: String,
    /// Position in the tenant's chain, starting at 1
    pub sequence: u64,
    pub actor_id: Option<String>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub changed_fields: Option<Vec<String>>,
    pub metadata: Option<Value>,
    /// When the action happened, as reported by the caller
    pub timestamp: DateTime<Utc>,
    /// When the ledger appended the entry. Retention ages entries by this.
    pub recorded_at: DateTime<Utc>,
    pub content_hash: String,
    /// Content hash of the preceding entry, or [`SEED_HASH`]
    pub previous_hash: String,
}

/// Every field except `contentHash`, in canonical form.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashedFields<'a> {
    id: &'a Uuid,
    tenant_id: &'a str,
    sequence: u64,
    actor_id: Option<&'a str>,
    action: AuditAction,
    entity_type: &'a str,
    entity_id: Option<&'a str>,
    old_values: Option<&'a Value>,
    new_values: Option<&'a Value>,
    changed_fields: Option<&'a [String]>,
    metadata: Option<&'a Value>,
    timestamp: String,
    recorded_at: String,
    previous_hash: &'a str,
}

impl AuditEntry {
    /// Recompute the content hash from the stored fields.
    pub fn compute_hash(&self) -> Result<String> {
        let fields = HashedFields {
            id: &self.id,
            tenant_id: &self.tenant_id,
            sequence: self.sequence,
            actor_id: self.actor_id.as_deref(),
            action: self.action,
            entity_type: &self.entity_type,
            entity_id: self.entity_id.as_deref(),
            old_values: self.old_values.as_ref(),
            new_values: self.new_values.as_ref(),
            changed_fields: self.changed_fields.as_deref(),
            metadata: self.metadata.as_ref(),
            timestamp: canonical_timestamp(&self.timestamp),
            recorded_at: canonical_timestamp(&self.recorded_at),
            previous_hash: &self.previous_hash,
        };
        Ok(canonical::digest(&fields)?)
    }

    /// Whether the stored hash matches a recomputation.
    pub fn is_intact(&self) -> bool {
        self.compute_hash().is_ok_and(|hash| hash == self.content_hash)
    }

    /// Build and seal the entry following `head`.
    pub(crate) fn seal(
        draft: AuditDraft,
        sequence: u64,
        previous_hash: String,
        recorded_at: DateTime<Utc>,
    ) -> Result<Self> {
        let mut entry = AuditEntry {
            id: Uuid::new_v4(),
            tenant_id: draft.tenant_id,
            sequence,
            actor_id: draft.actor_id,
            action: draft.action,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            old_values: draft.old_values,
            new_values: draft.new_values,
            changed_fields: draft.changed_fields,
            metadata: draft.metadata,
            timestamp: draft.occurred_at.trunc_subsecs(6),
            recorded_at: recorded_at.trunc_subsecs(6),
            content_hash: String::new(),
            previous_hash,
        };
        entry.content_hash = entry.compute_hash()?;
        Ok(entry)
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// RFC 3339, UTC, microsecond precision, `Z` suffix.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current chain position of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainHead {
    pub sequence: u64,
    pub content_hash: String,
}

impl ChainHead {
    pub fn seed() -> Self {
        Self {
            sequence: 0,
            content_hash: SEED_HASH.to_string(),
        }
    }
}

/// Last pruned position of a chain. The first retained entry links to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainCheckpoint {
    pub tenant_id: String,
    pub sequence: u64,
    pub content_hash: String,
}

impl From<&ChainCheckpoint> for ChainHead {
    fn from(cp: &ChainCheckpoint) -> Self {
        Self {
            sequence: cp.sequence,
            content_hash: cp.content_hash.clone(),
        }
    }
}

impl From<&AuditEntry> for ChainHead {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            sequence: entry.sequence,
            content_hash: entry.content_hash.clone(),
        }
    }
}

/// An action to be audited, before it is sequenced and hashed.
///
/// # Examples
///
/// ```
/// use citadel_audit::{AuditAction, AuditDraft};
/// use serde_json::json;
///
/// let draft = AuditDraft::new("acme", AuditAction::Update, "Client")
///     .actor("user-7")
///     .entity_id("c-42")
///     .old_values(json!({"name": "Old"}))
///     .new_values(json!({"name": "New"}));
/// assert_eq!(draft.entity_type, "Client");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditDraft {
    pub tenant_id: String,
    pub actor_id: Option<String>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub changed_fields: Option<Vec<String>>,
    pub metadata: Option<Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditDraft {
    pub fn new(
        tenant_id: impl Into<String>,
        action: AuditAction,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: None,
            action,
            entity_type: entity_type.into(),
            entity_id: None,
            old_values: None,
            new_values: None,
            changed_fields: None,
            metadata: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn old_values(mut self, values: Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn new_values(mut self, values: Value) -> Self {
        self.new_values = Some(values);
        self
    }

    /// Override the derived list of changed fields
    pub fn changed_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changed_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sealed() -> AuditEntry {
        let draft = AuditDraft::new("acme", AuditAction::Update, "Client")
            .entity_id("c-1")
            .new_values(json!({"name": "Acme", "tier": 2}));
        AuditEntry::seal(draft, 1, SEED_HASH.to_string(), Utc::now()).unwrap()
    }

    #[test]
    fn test_seal_produces_intact_entry() {
        let entry = sealed();
        assert_eq!(entry.content_hash.len(), 64);
        assert!(entry.is_intact());
    }

    #[test]
    fn test_any_field_change_breaks_hash() {
        let entry = sealed();

        let mut e = entry.clone();
        e.entity_id = Some("c-2".to_string());
        assert!(!e.is_intact());

        let mut e = entry.clone();
        e.new_values = Some(json!({"name": "Acme", "tier": 3}));
        assert!(!e.is_intact());

        let mut e = entry.clone();
        e.timestamp += chrono::Duration::microseconds(1);
        assert!(!e.is_intact());

        let mut e = entry.clone();
        e.recorded_at -= chrono::Duration::days(400);
        assert!(!e.is_intact());

        let mut e = entry;
        e.previous_hash = "f".repeat(64);
        assert!(!e.is_intact());
    }

    #[test]
    fn test_hash_survives_json_round_trip() {
        let entry = sealed();
        let restored: AuditEntry = serde_json::from_str(&entry.to_json().unwrap()).unwrap();
        assert_eq!(restored, entry);
        assert!(restored.is_intact());
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_value(sealed()).unwrap();
        assert_eq!(json["action"], "update");
        assert_eq!(json["previousHash"], SEED_HASH);
        assert!(json.get("contentHash").is_some());
        assert!(json.get("tenantId").is_some());
    }

    #[test]
    fn test_canonical_timestamp_format() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T12:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(canonical_timestamp(&ts.trunc_subsecs(6)), "2024-03-01T12:00:00.123456Z");
    }

    #[test]
    fn test_action_names_match_serde() {
        for action in AuditAction::ALL {
            assert_eq!(serde_json::to_value(action).unwrap(), action.as_str());
        }
    }
}
