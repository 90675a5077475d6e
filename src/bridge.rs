//! Audit-cache bridge.
//!
//! Every mutation goes through [`AuditCacheBridge::record`], which
//!
//! 1. appends one audit entry,
//! 2. derives cache tags for the mutated entity,
//! 3. evicts those tags from the read cache, and
//! 4. queues a CDN purge for the same tags.
//!
//! Only step 1 can fail the mutation. When the ledger store is unreachable
//! the draft is masked, parked in the outbox for replay and the caller sees
//! [`Error::StorageUnavailable`]. Steps 3 and 4 are logged and reported in
//! the [`MutationOutcome`] but never turn the write into an error.

use crate::error::{Error, Result};
use citadel_audit::{AUDIT_APPEND_EVENT, AuditDraft, AuditEntry, AuditLedger, LedgerError, Outbox};
use citadel_cache::{EntityTagMap, TaggedCache};
use citadel_cdn::InvalidationCoordinator;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happened downstream of a recorded mutation.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub entry: AuditEntry,
    /// Tags derived from the entity type
    pub tags: Vec<String>,
    /// Cache keys evicted across all tags
    pub evicted: usize,
    /// Whether a CDN purge was queued
    pub purge_scheduled: bool,
    /// Cache or CDN failures, logged and otherwise ignored
    pub invalidation_errors: Vec<String>,
}

impl MutationOutcome {
    pub fn fully_invalidated(&self) -> bool {
        self.invalidation_errors.is_empty()
    }
}

pub struct AuditCacheBridge {
    ledger: Arc<AuditLedger>,
    outbox: Arc<dyn Outbox>,
    cache: Arc<TaggedCache>,
    tags: EntityTagMap,
    cdn: Option<Arc<InvalidationCoordinator>>,
}

impl AuditCacheBridge {
    pub fn new(
        ledger: Arc<AuditLedger>,
        outbox: Arc<dyn Outbox>,
        cache: Arc<TaggedCache>,
        tags: EntityTagMap,
    ) -> Self {
        Self {
            ledger,
            outbox,
            cache,
            tags,
            cdn: None,
        }
    }

    /// Queue CDN purges through `coordinator`.
    pub fn with_cdn(mut self, coordinator: Arc<InvalidationCoordinator>) -> Self {
        self.cdn = Some(coordinator);
        self
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    pub fn cache(&self) -> &Arc<TaggedCache> {
        &self.cache
    }

    pub fn tag_map(&self) -> &EntityTagMap {
        &self.tags
    }

    /// Audit a mutation and invalidate everything derived from the entity.
    pub async fn record(&self, draft: AuditDraft) -> Result<MutationOutcome> {
        let entry = match self.ledger.append(draft.clone()).await {
            Ok(entry) => entry,
            Err(LedgerError::StorageUnavailable(reason)) => {
                self.defer(draft).await;
                return Err(Error::StorageUnavailable(reason));
            }
            Err(e) => return Err(e.into()),
        };

        let tags = self.tags.tags_for(
            &entry.entity_type,
            &entry.tenant_id,
            entry.entity_id.as_deref(),
        );
        let mut invalidation_errors = Vec::new();

        let evicted = match self.cache.invalidate_tags(&tags).await {
            Ok(evicted) => evicted,
            Err(e) => {
                warn!(tenant = %entry.tenant_id, tags = ?tags, error = %e, "Cache invalidation failed");
                invalidation_errors.push(e.to_string());
                0
            }
        };

        let purge_scheduled = match (&self.cdn, tags.is_empty()) {
            (Some(cdn), false) => match cdn.schedule_tags(tags.iter().cloned()) {
                Ok(()) => true,
                Err(e) => {
                    warn!(tenant = %entry.tenant_id, tags = ?tags, error = %e, "CDN purge not queued");
                    invalidation_errors.push(e.to_string());
                    false
                }
            },
            _ => false,
        };

        info!(
            tenant = %entry.tenant_id,
            sequence = entry.sequence,
            action = %entry.action,
            entity_type = %entry.entity_type,
            evicted,
            purge_scheduled,
            "Mutation recorded"
        );

        Ok(MutationOutcome {
            entry,
            tags,
            evicted,
            purge_scheduled,
            invalidation_errors,
        })
    }

    async fn defer(&self, draft: AuditDraft) {
        // The outbox is persisted too, so it gets the same masking as the ledger.
        let draft = self.ledger.mask_draft(draft);
        let tenant = draft.tenant_id.clone();
        let payload = match serde_json::to_value(&draft) {
            Ok(payload) => payload,
            Err(e) => {
                error!(tenant = %tenant, error = %e, "Audit draft could not be serialized for the outbox");
                return;
            }
        };

        match self.outbox.enqueue(AUDIT_APPEND_EVENT, payload).await {
            Ok(id) => warn!(tenant = %tenant, message_id = %id, "Ledger unavailable, audit entry deferred to outbox"),
            Err(e) => error!(tenant = %tenant, error = %e, "Ledger and outbox both unavailable, audit entry lost"),
        }
    }
}
