//! The audit ledger: sequencing, hashing, verification and queries.

use crate::entry::{AuditAction, AuditDraft, AuditEntry, ChainHead};
use crate::error::{LedgerError, Result};
use crate::masking::{MaskingConfig, mask_json};
use crate::store::LedgerStore;
use chrono::{DateTime, Utc};
use citadel_tenancy::is_valid_tenant_id;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Why verification stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainBreak {
    /// The stored `contentHash` does not match a recomputation
    ContentMismatch,
    /// An entry is missing between the previous one and this one
    SequenceGap { expected: u64, found: u64 },
    /// `previousHash` does not match the predecessor's `contentHash`
    LinkMismatch,
}

impl std::fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainBreak::ContentMismatch => f.write_str("content hash mismatch"),
            ChainBreak::SequenceGap { expected, found } => {
                write!(f, "sequence gap: expected {}, found {}", expected, found)
            }
            ChainBreak::LinkMismatch => f.write_str("previous hash does not match predecessor"),
        }
    }
}

/// Result of [`AuditLedger::verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub valid: bool,
    /// First entry found broken
    pub broken_at: Option<Uuid>,
    pub broken_sequence: Option<u64>,
    pub reason: Option<ChainBreak>,
    /// Entries examined, including the broken one
    pub entries_checked: usize,
}

/// Filters for [`AuditLedger::query`]. All set filters must match.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub actor_id: Option<String>,
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: Option<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = entity_id;
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        self.action.is_none_or(|a| entry.action == a)
            && self
                .entity_type
                .as_deref()
                .is_none_or(|t| entry.entity_type == t)
            && self
                .entity_id
                .as_deref()
                .is_none_or(|id| entry.entity_id.as_deref() == Some(id))
            && self
                .actor_id
                .as_deref()
                .is_none_or(|id| entry.actor_id.as_deref() == Some(id))
            && self.since.is_none_or(|since| entry.timestamp >= since)
            && self.until.is_none_or(|until| entry.timestamp < until)
    }
}

/// Source of append times.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Tamper-evident, per-tenant hash-chained audit log.
///
/// Appends for one tenant are serialized by a per-tenant lock; different
/// tenants append in parallel.
pub struct AuditLedger {
    store: Arc<dyn LedgerStore>,
    masking: MaskingConfig,
    clock: Clock,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_masking(store, MaskingConfig::default())
    }

    pub fn with_masking(store: Arc<dyn LedgerStore>, masking: MaskingConfig) -> Self {
        Self {
            store,
            masking,
            clock: Arc::new(Utc::now),
            locks: DashMap::new(),
        }
    }

    /// Stamp `recordedAt` from `clock` instead of the system time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    fn lock_for(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Derive `changedFields` and mask sensitive values the way `append` does.
    ///
    /// Masking is idempotent, so a draft masked here and parked elsewhere
    /// appends to the same entry later.
    pub fn mask_draft(&self, mut draft: AuditDraft) -> AuditDraft {
        if draft.changed_fields.is_none() {
            draft.changed_fields = changed_fields(draft.old_values.as_ref(), draft.new_values.as_ref());
        }
        draft.old_values = draft.old_values.map(|v| mask_json(&v, &self.masking));
        draft.new_values = draft.new_values.map(|v| mask_json(&v, &self.masking));
        draft.metadata = draft.metadata.map(|v| mask_json(&v, &self.masking));
        draft
    }

    /// Sequence, hash and persist one audited action.
    ///
    /// Sensitive values are masked before hashing. When the draft carries no
    /// `changedFields`, they are derived from the old and new values.
    pub async fn append(&self, draft: AuditDraft) -> Result<AuditEntry> {
        if !is_valid_tenant_id(&draft.tenant_id) {
            return Err(LedgerError::Invalid(format!(
                "invalid tenant id {:?}",
                draft.tenant_id
            )));
        }
        if draft.entity_type.trim().is_empty() {
            return Err(LedgerError::Invalid("entity type is required".to_string()));
        }

        let draft = self.mask_draft(draft);

        let lock = self.lock_for(&draft.tenant_id);
        let _guard = lock.lock().await;

        let head = self
            .store
            .head(&draft.tenant_id)
            .await?
            .unwrap_or_else(ChainHead::seed);

        let entry = AuditEntry::seal(draft, head.sequence + 1, head.content_hash, (self.clock)())?;
        self.store.append(&entry).await?;

        debug!(
            tenant = %entry.tenant_id,
            sequence = entry.sequence,
            action = %entry.action,
            entity_type = %entry.entity_type,
            "Audit entry appended"
        );
        Ok(entry)
    }

    /// Walk a tenant's chain and report the first break.
    ///
    /// Starts at `from_sequence` (or the oldest retained entry). The anchor is
    /// the entry just before the range, the retention checkpoint, or the seed.
    /// Each entry is checked for content, then sequence, then linkage.
    pub async fn verify_chain(
        &self,
        tenant_id: &str,
        from_sequence: Option<u64>,
    ) -> Result<ChainVerification> {
        let checkpoint = self.store.checkpoint(tenant_id).await?;
        let floor = checkpoint.as_ref().map_or(0, |cp| cp.sequence);
        let from = from_sequence.unwrap_or(0).max(floor + 1);

        let window = self.store.entries(tenant_id, from - 1).await?;
        let (mut previous, entries) = match window.split_first() {
            Some((first, rest)) if first.sequence + 1 == from => (Some(ChainHead::from(first)), rest),
            _ if from == floor + 1 => (
                Some(checkpoint.as_ref().map_or_else(ChainHead::seed, ChainHead::from)),
                window.as_slice(),
            ),
            // Predecessor of a partial range is gone; trust the first entry's position.
            _ => (None, window.as_slice()),
        };

        let mut checked = 0;
        for entry in entries {
            checked += 1;

            let broken = if !entry.is_intact() {
                Some(ChainBreak::ContentMismatch)
            } else if let Some(prev) = &previous {
                if entry.sequence != prev.sequence + 1 {
                    Some(ChainBreak::SequenceGap {
                        expected: prev.sequence + 1,
                        found: entry.sequence,
                    })
                } else if entry.previous_hash != prev.content_hash {
                    Some(ChainBreak::LinkMismatch)
                } else {
                    None
                }
            } else {
                None
            };

            if let Some(reason) = broken {
                return Ok(ChainVerification {
                    valid: false,
                    broken_at: Some(entry.id),
                    broken_sequence: Some(entry.sequence),
                    reason: Some(reason),
                    entries_checked: checked,
                });
            }
            previous = Some(ChainHead::from(entry));
        }

        Ok(ChainVerification {
            valid: true,
            broken_at: None,
            broken_sequence: None,
            reason: None,
            entries_checked: checked,
        })
    }

    /// Like [`verify_chain`](Self::verify_chain) but a break is an error.
    pub async fn assert_chain(&self, tenant_id: &str) -> Result<usize> {
        let report = self.verify_chain(tenant_id, None).await?;
        if report.valid {
            return Ok(report.entries_checked);
        }

        let reason = report
            .reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        error!(
            tenant = %tenant_id,
            entry_id = ?report.broken_at,
            sequence = ?report.broken_sequence,
            reason = %reason,
            "Audit chain integrity violation"
        );
        Err(LedgerError::ChainIntegrityViolation {
            tenant_id: tenant_id.to_string(),
            entry_id: report.broken_at,
            reason,
        })
    }

    /// Matching entries, newest first.
    pub async fn query(&self, tenant_id: &str, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let entries = self.store.entries(tenant_id, 0).await?;
        Ok(entries
            .into_iter()
            .rev()
            .filter(|e| query.matches(e))
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    /// Delete the oldest entries recorded before `cutoff`.
    ///
    /// Ages come from the ledger's `recordedAt`, so a backdated `timestamp`
    /// cannot shorten retention. Only a contiguous prefix is removed; the
    /// first entry at or after the cutoff stops the scan. Returns the number
    /// of entries removed.
    pub async fn prune_before(&self, tenant_id: &str, cutoff: DateTime<Utc>) -> Result<usize> {
        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;

        let entries = self.store.entries(tenant_id, 0).await?;
        let Some(through) = entries
            .iter()
            .take_while(|e| e.recorded_at < cutoff)
            .last()
            .map(|e| e.sequence)
        else {
            return Ok(0);
        };

        let pruned = self.store.prune(tenant_id, through).await?;
        info!(tenant = %tenant_id, pruned, through_sequence = through, "Pruned expired audit entries");
        Ok(pruned)
    }
}

/// Top-level keys whose values differ between `old` and `new`, sorted.
///
/// A missing side counts as an empty object, so a create lists every new key.
/// Returns `None` when neither side is an object.
pub fn changed_fields(old: Option<&Value>, new: Option<&Value>) -> Option<Vec<String>> {
    fn as_object(v: Option<&Value>) -> Option<&Map<String, Value>> {
        match v {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    let empty = Map::new();

    let (old, new) = match (as_object(old), as_object(new)) {
        (None, None) => return None,
        (old, new) => (old.unwrap_or(&empty), new.unwrap_or(&empty)),
    };

    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    Some(
        keys.into_iter()
            .filter(|key| old.get(*key) != new.get(*key))
            .cloned()
            .collect(),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::entry::SEED_HASH;
    use crate::store::MemoryLedgerStore;
    use chrono::SubsecRound;
    use serde_json::json;

    /// Clock moved by hand.
    #[derive(Clone)]
    pub(crate) struct ManualClock(Arc<parking_lot::Mutex<DateTime<Utc>>>);

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self(Arc::new(parking_lot::Mutex::new(Utc::now())))
        }

        pub(crate) fn set(&self, at: DateTime<Utc>) {
            *self.0.lock() = at;
        }

        pub(crate) fn clock(&self) -> Clock {
            let now = self.0.clone();
            Arc::new(move || *now.lock())
        }
    }

    fn ledger() -> (Arc<MemoryLedgerStore>, AuditLedger) {
        let store = Arc::new(MemoryLedgerStore::new());
        (store.clone(), AuditLedger::new(store))
    }

    fn clocked_ledger() -> (Arc<MemoryLedgerStore>, AuditLedger, ManualClock) {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = ManualClock::new();
        let ledger = AuditLedger::new(store.clone()).with_clock(clock.clock());
        (store, ledger, clock)
    }

    fn update(tenant: &str, id: &str) -> AuditDraft {
        AuditDraft::new(tenant, AuditAction::Update, "Client")
            .entity_id(id)
            .old_values(json!({"name": "Old", "city": "Oslo"}))
            .new_values(json!({"name": "New", "city": "Oslo"}))
    }

    #[tokio::test]
    async fn test_append_links_entries() {
        let (_, ledger) = ledger();

        let first = ledger.append(update("acme", "c-1")).await.unwrap();
        let second = ledger.append(update("acme", "c-2")).await.unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(first.previous_hash, SEED_HASH);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.previous_hash, first.content_hash);
        assert_eq!(first.changed_fields, Some(vec!["name".to_string()]));
    }

    #[tokio::test]
    async fn test_chains_are_per_tenant() {
        let (_, ledger) = ledger();
        ledger.append(update("acme", "c-1")).await.unwrap();
        let other = ledger.append(update("globex", "c-1")).await.unwrap();
        assert_eq!(other.sequence, 1);
        assert_eq!(other.previous_hash, SEED_HASH);
    }

    #[tokio::test]
    async fn test_masks_before_hashing() {
        let (_, ledger) = ledger();
        let entry = ledger
            .append(
                AuditDraft::new("acme", AuditAction::PasswordChange, "User")
                    .new_values(json!({"password": "hunter2-secret"})),
            )
            .await
            .unwrap();

        assert_eq!(entry.new_values.as_ref().unwrap()["password"], "**********cret");
        assert!(entry.is_intact());
        assert!(ledger.verify_chain("acme", None).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_masked_draft_appends_unchanged() {
        let (_, ledger) = ledger();
        let draft = AuditDraft::new("acme", AuditAction::PasswordChange, "User")
            .old_values(json!({"password": "old-secret", "pin_token": 42}))
            .new_values(json!({"password": "new-secret", "pin_token": 42}));

        let masked = ledger.mask_draft(draft);
        assert_eq!(masked.new_values.as_ref().unwrap()["password"], "******cret");
        assert_eq!(masked.changed_fields, Some(vec!["password".to_string()]));

        let entry = ledger.append(masked.clone()).await.unwrap();
        assert_eq!(entry.new_values, masked.new_values);
        assert_eq!(entry.old_values, masked.old_values);
    }

    #[tokio::test]
    async fn test_verify_detects_tamper() {
        let (store, ledger) = ledger();
        for i in 0..4 {
            ledger.append(update("acme", &format!("c-{i}"))).await.unwrap();
        }

        let mut entries = store.entries("acme", 0).await.unwrap();
        let mut victim = entries.remove(1);
        victim.actor_id = Some("mallory".to_string());
        let victim_id = victim.id;
        store.overwrite(victim);

        let report = ledger.verify_chain("acme", None).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.broken_at, Some(victim_id));
        assert_eq!(report.reason, Some(ChainBreak::ContentMismatch));
        assert_eq!(report.entries_checked, 2);
    }

    #[tokio::test]
    async fn test_verify_detects_rehashed_tamper_at_successor() {
        let (store, ledger) = ledger();
        for i in 0..3 {
            ledger.append(update("acme", &format!("c-{i}"))).await.unwrap();
        }

        let entries = store.entries("acme", 0).await.unwrap();
        let mut forged = entries[1].clone();
        forged.entity_id = Some("forged".to_string());
        forged.content_hash = forged.compute_hash().unwrap();
        store.overwrite(forged);

        let report = ledger.verify_chain("acme", None).await.unwrap();
        assert_eq!(report.broken_at, Some(entries[2].id));
        assert_eq!(report.reason, Some(ChainBreak::LinkMismatch));
    }

    #[tokio::test]
    async fn test_verify_from_sequence() {
        let (_, ledger) = ledger();
        for i in 0..5 {
            ledger.append(update("acme", &format!("c-{i}"))).await.unwrap();
        }

        let report = ledger.verify_chain("acme", Some(3)).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 3);
    }

    #[tokio::test]
    async fn test_assert_chain_error() {
        let (store, ledger) = ledger();
        ledger.append(update("acme", "c-1")).await.unwrap();
        ledger.append(update("acme", "c-2")).await.unwrap();
        ledger.append(update("acme", "c-3")).await.unwrap();
        store.remove("acme", 2);

        let err = ledger.assert_chain("acme").await.unwrap_err();
        assert!(matches!(err, LedgerError::ChainIntegrityViolation { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_query_filters_and_pages() {
        let (_, ledger) = ledger();
        ledger.append(update("acme", "c-1").actor("u-1")).await.unwrap();
        ledger.append(update("acme", "c-2").actor("u-2")).await.unwrap();
        ledger
            .append(AuditDraft::new("acme", AuditAction::Delete, "Case").entity_id("k-1"))
            .await
            .unwrap();
        ledger.append(update("acme", "c-1").actor("u-1")).await.unwrap();

        let updates = ledger
            .query("acme", &AuditQuery::new().action(AuditAction::Update))
            .await
            .unwrap();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].sequence, 4);

        let client = ledger
            .query("acme", &AuditQuery::new().entity("Client", Some("c-1".to_string())))
            .await
            .unwrap();
        assert_eq!(client.len(), 2);

        let page = ledger
            .query("acme", &AuditQuery::new().actor("u-1").offset(1).limit(5))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].sequence, 1);
    }

    #[tokio::test]
    async fn test_prune_keeps_chain_verifiable() {
        let (store, ledger, clock) = clocked_ledger();
        let now = Utc::now();
        clock.set(now - chrono::Duration::days(400));
        for i in 0..3 {
            ledger.append(update("acme", &format!("c-{i}"))).await.unwrap();
        }
        clock.set(now);
        ledger.append(update("acme", "c-new")).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(365);
        assert_eq!(ledger.prune_before("acme", cutoff).await.unwrap(), 3);
        assert_eq!(store.checkpoint("acme").await.unwrap().unwrap().sequence, 3);

        let report = ledger.verify_chain("acme", None).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 1);

        let next = ledger.append(update("acme", "c-next")).await.unwrap();
        assert_eq!(next.sequence, 5);
    }

    #[tokio::test]
    async fn test_prune_stops_at_first_retained() {
        let (_, ledger, clock) = clocked_ledger();
        let now = Utc::now();
        let old = now - chrono::Duration::days(400);
        clock.set(old);
        ledger.append(update("acme", "a")).await.unwrap();
        clock.set(now);
        ledger.append(update("acme", "b")).await.unwrap();
        // A clock step back behind a retained entry stays put.
        clock.set(old);
        ledger.append(update("acme", "c")).await.unwrap();

        let cutoff = now - chrono::Duration::days(365);
        assert_eq!(ledger.prune_before("acme", cutoff).await.unwrap(), 1);
        assert!(ledger.verify_chain("acme", None).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_backdated_entry_not_pruned_early() {
        let (_, ledger) = ledger();
        let old = Utc::now() - chrono::Duration::days(400);
        let entry = ledger.append(update("acme", "a").occurred_at(old)).await.unwrap();
        assert_eq!(entry.timestamp, old.trunc_subsecs(6));

        let cutoff = Utc::now() - chrono::Duration::days(365);
        assert_eq!(ledger.prune_before("acme", cutoff).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let (store, ledger) = ledger();
        store.set_unavailable(true);
        let err = ledger.append(update("acme", "c-1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rejects_invalid_draft() {
        let (_, ledger) = ledger();
        assert!(matches!(
            ledger.append(update("Not A Tenant", "c-1")).await,
            Err(LedgerError::Invalid(_))
        ));
        assert!(matches!(
            ledger.append(AuditDraft::new("acme", AuditAction::Create, " ")).await,
            Err(LedgerError::Invalid(_))
        ));
    }

    #[test]
    fn test_changed_fields() {
        let old = json!({"a": 1, "b": 2, "gone": true});
        let new = json!({"a": 1, "b": 3, "added": "x"});
        assert_eq!(
            changed_fields(Some(&old), Some(&new)).unwrap(),
            vec!["added", "b", "gone"]
        );
        assert_eq!(
            changed_fields(None, Some(&json!({"z": 1, "y": 2}))).unwrap(),
            vec!["y", "z"]
        );
        assert_eq!(changed_fields(None, None), None);
        assert_eq!(changed_fields(Some(&json!(1)), Some(&json!(2))), None);
    }
}
