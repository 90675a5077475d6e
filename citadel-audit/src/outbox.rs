//! Deferred audit appends.
//!
//! When the ledger store is unreachable the draft is parked in an outbox and
//! replayed by the [`OutboxDispatcher`] with exponential backoff. Messages that
//! exhaust their attempts are marked dead and left for an operator.

use crate::entry::AuditDraft;
use crate::error::OutboxError;
use crate::ledger::AuditLedger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use citadel_core::PeriodicTask;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use uuid::Uuid;

/// Event type for a serialized [`AuditDraft`] awaiting append.
pub const AUDIT_APPEND_EVENT: &str = "audit.append";

const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// How long a claimed message stays invisible before another claim may take it.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

type Result<T> = std::result::Result<T, OutboxError>;

/// Outbox message state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxState {
    /// Waiting for its first attempt
    Pending,
    /// Claimed by a dispatcher until `nextAttemptAt`
    Processing,
    /// Handled. Stores may drop completed messages outright.
    Completed,
    /// Failed and scheduled for retry
    Failed,
    /// Failed permanently (max attempts exceeded)
    Dead,
}

/// A deferred event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxMessage {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub state: OutboxState,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    pub fn new(event_type: impl Into<String>, payload: Value, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            state: OutboxState::Pending,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
        }
    }

    /// Check if the message is due for an attempt.
    ///
    /// A `Processing` message whose claim has lapsed is due again: the
    /// dispatcher that took it never reported back.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.state,
            OutboxState::Pending | OutboxState::Failed | OutboxState::Processing
        ) && self.next_attempt_at <= now
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Delay before the next attempt: `base * 2^(attempts - 1)`, capped at an hour.
    pub fn backoff_delay(&self, base: Duration) -> Duration {
        let factor = 2_u32.saturating_pow(self.attempts.saturating_sub(1));
        base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Durable queue for deferred events.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn enqueue(&self, event_type: &str, payload: Value) -> Result<Uuid>;
}

/// Outbox storage used by the dispatcher.
#[async_trait]
pub trait OutboxStore: Outbox {
    /// Mark up to `limit` ready messages as processing and return them,
    /// oldest first. Each claim counts as one attempt and hides the message
    /// until its visibility timeout passes.
    async fn claim_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxMessage>>;

    /// Finish a message. It is never claimed again.
    async fn complete(&self, id: Uuid) -> Result<()>;

    /// Record a failed attempt. `retry_at: None` marks the message dead.
    async fn fail(&self, id: Uuid, error: String, retry_at: Option<DateTime<Utc>>) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<OutboxMessage>>;

    /// Messages in the dead state
    async fn dead_letters(&self) -> Result<Vec<OutboxMessage>>;
}

/// In-memory outbox. Completed messages are removed.
pub struct MemoryOutbox {
    messages: Mutex<HashMap<Uuid, OutboxMessage>>,
    max_attempts: u32,
    visibility_timeout: chrono::Duration,
    unavailable: AtomicBool,
}

impl Default for MemoryOutbox {
    fn default() -> Self {
        Self::new(5)
    }
}

impl MemoryOutbox {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            messages: Mutex::new(HashMap::new()),
            max_attempts,
            visibility_timeout: to_chrono(DEFAULT_VISIBILITY_TIMEOUT),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Reclaim a processing message after `timeout` without a report.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = to_chrono(timeout);
        self
    }

    /// Simulate an outage of the backing queue
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages with the given state
    pub fn count(&self, state: OutboxState) -> usize {
        self.messages
            .lock()
            .values()
            .filter(|m| m.state == state)
            .count()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OutboxError::Unavailable("memory outbox offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Outbox for MemoryOutbox {
    async fn enqueue(&self, event_type: &str, payload: Value) -> Result<Uuid> {
        self.check_available()?;
        let message = OutboxMessage::new(event_type, payload, self.max_attempts);
        let id = message.id;
        self.messages.lock().insert(id, message);
        tracing::debug!(message_id = %id, event_type = %event_type, "Outbox message enqueued");
        Ok(id)
    }
}

#[async_trait]
impl OutboxStore for MemoryOutbox {
    async fn claim_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxMessage>> {
        self.check_available()?;
        let mut messages = self.messages.lock();

        let mut ready: Vec<&mut OutboxMessage> =
            messages.values_mut().filter(|m| m.is_ready(now)).collect();
        ready.sort_by_key(|m| m.created_at);

        Ok(ready
            .into_iter()
            .take(limit)
            .map(|m| {
                if m.state == OutboxState::Processing {
                    tracing::warn!(message_id = %m.id, attempts = m.attempts, "Reclaiming outbox message with lapsed claim");
                }
                m.state = OutboxState::Processing;
                m.attempts += 1;
                m.next_attempt_at = now + self.visibility_timeout;
                m.clone()
            })
            .collect())
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        self.check_available()?;
        self.messages
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(OutboxError::NotFound(id))
    }

    async fn fail(&self, id: Uuid, error: String, retry_at: Option<DateTime<Utc>>) -> Result<()> {
        self.check_available()?;
        let mut messages = self.messages.lock();
        let message = messages.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        message.last_error = Some(error);
        match retry_at {
            Some(at) => {
                message.state = OutboxState::Failed;
                message.next_attempt_at = at;
            }
            None => message.state = OutboxState::Dead,
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxMessage>> {
        self.check_available()?;
        Ok(self.messages.lock().get(&id).cloned())
    }

    async fn dead_letters(&self) -> Result<Vec<OutboxMessage>> {
        self.check_available()?;
        let mut dead: Vec<OutboxMessage> = self
            .messages
            .lock()
            .values()
            .filter(|m| m.state == OutboxState::Dead)
            .cloned()
            .collect();
        dead.sort_by_key(|m| m.created_at);
        Ok(dead)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::hours(1))
}

/// Processes one event type.
#[async_trait]
pub trait OutboxHandler: Send + Sync {
    async fn handle(&self, message: &OutboxMessage) -> Result<()>;
}

/// Replays deferred drafts into the ledger.
pub struct AppendDraftHandler {
    ledger: Arc<AuditLedger>,
}

impl AppendDraftHandler {
    pub fn new(ledger: Arc<AuditLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl OutboxHandler for AppendDraftHandler {
    async fn handle(&self, message: &OutboxMessage) -> Result<()> {
        let draft: AuditDraft = serde_json::from_value(message.payload.clone())?;
        let entry = self
            .ledger
            .append(draft)
            .await
            .map_err(|e| OutboxError::Handler(e.to_string()))?;
        tracing::info!(
            message_id = %message.id,
            tenant = %entry.tenant_id,
            sequence = entry.sequence,
            "Deferred audit entry appended"
        );
        Ok(())
    }
}

/// Outcome of one dispatch pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub completed: usize,
    pub retried: usize,
    pub dead: usize,
}

/// Polls an [`OutboxStore`] and runs handlers with retry and backoff.
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    handlers: HashMap<String, Arc<dyn OutboxHandler>>,
    base_backoff: Duration,
    batch_size: usize,
    task: PeriodicTask,
}

impl OutboxDispatcher {
    pub fn new(store: Arc<dyn OutboxStore>, poll_interval: Duration, base_backoff: Duration) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            base_backoff,
            batch_size: 32,
            task: PeriodicTask::new("outbox-dispatch", poll_interval),
        }
    }

    /// Register the handler for an event type.
    pub fn register(mut self, event_type: impl Into<String>, handler: Arc<dyn OutboxHandler>) -> Self {
        self.handlers.insert(event_type.into(), handler);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Claim ready messages and run them once.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();

        for message in self.store.claim_ready(now, self.batch_size).await? {
            let outcome = match self.handlers.get(&message.event_type) {
                Some(handler) => handler.handle(&message).await,
                None => Err(OutboxError::Handler(format!(
                    "no handler for event type {}",
                    message.event_type
                ))),
            };

            match outcome {
                Ok(()) => {
                    self.store.complete(message.id).await?;
                    report.completed += 1;
                }
                Err(e) if message.can_retry() => {
                    let delay = message.backoff_delay(self.base_backoff);
                    let retry_at = now + to_chrono(delay);
                    tracing::warn!(
                        message_id = %message.id,
                        event_type = %message.event_type,
                        attempt = message.attempts,
                        retry_in = ?delay,
                        error = %e,
                        "Outbox message failed, retrying"
                    );
                    self.store.fail(message.id, e.to_string(), Some(retry_at)).await?;
                    report.retried += 1;
                }
                Err(e) => {
                    tracing::error!(
                        message_id = %message.id,
                        event_type = %message.event_type,
                        attempts = message.attempts,
                        error = %e,
                        "Outbox message dead after max attempts, manual intervention required"
                    );
                    self.store.fail(message.id, e.to_string(), None).await?;
                    report.dead += 1;
                }
            }
        }

        Ok(report)
    }

    /// Start polling on the configured interval.
    pub fn start(self: &Arc<Self>) -> bool {
        let dispatcher: Weak<Self> = Arc::downgrade(self);
        self.task.start(move || {
            let dispatcher = dispatcher.clone();
            async move {
                if let Some(dispatcher) = dispatcher.upgrade()
                    && let Err(e) = dispatcher.run_once(Utc::now()).await
                {
                    tracing::error!(error = %e, "Outbox dispatch failed");
                }
            }
        })
    }

    pub async fn stop(&self) {
        self.task.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditAction;
    use crate::store::{LedgerStore, MemoryLedgerStore};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct Flaky {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures_left: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl OutboxHandler for Flaky {
        async fn handle(&self, _message: &OutboxMessage) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(OutboxError::Handler("downstream offline".to_string()));
            }
            Ok(())
        }
    }

    fn dispatcher(outbox: &Arc<MemoryOutbox>, handler: Arc<dyn OutboxHandler>) -> OutboxDispatcher {
        OutboxDispatcher::new(outbox.clone(), Duration::from_secs(1), Duration::from_millis(500))
            .register("test", handler)
    }

    #[test]
    fn test_backoff_delay() {
        let mut message = OutboxMessage::new("test", json!({}), 5);
        let base = Duration::from_millis(500);

        message.attempts = 1;
        assert_eq!(message.backoff_delay(base), Duration::from_millis(500));
        message.attempts = 3;
        assert_eq!(message.backoff_delay(base), Duration::from_secs(2));
        message.attempts = 40;
        assert_eq!(message.backoff_delay(base), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_retry_then_complete() {
        let outbox = Arc::new(MemoryOutbox::new(5));
        let handler = Flaky::new(1);
        let dispatcher = dispatcher(&outbox, handler.clone());

        let id = outbox.enqueue("test", json!({"n": 1})).await.unwrap();
        let now = Utc::now();

        let report = dispatcher.run_once(now).await.unwrap();
        assert_eq!(report.retried, 1);
        let message = outbox.get(id).await.unwrap().unwrap();
        assert_eq!(message.state, OutboxState::Failed);
        assert_eq!(message.last_error.as_deref(), Some("Outbox handler failed: downstream offline"));

        // Not due yet
        assert_eq!(dispatcher.run_once(now).await.unwrap(), DispatchReport::default());

        let later = now + chrono::Duration::seconds(1);
        assert_eq!(dispatcher.run_once(later).await.unwrap().completed, 1);
        assert_eq!(outbox.get(id).await.unwrap(), None);
        assert!(outbox.is_empty());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dead_after_max_attempts() {
        let outbox = Arc::new(MemoryOutbox::new(3));
        let dispatcher = dispatcher(&outbox, Flaky::new(usize::MAX));

        let id = outbox.enqueue("test", json!({})).await.unwrap();
        let mut now = Utc::now();
        let mut dead = 0;
        for _ in 0..3 {
            dead += dispatcher.run_once(now).await.unwrap().dead;
            now += chrono::Duration::hours(2);
        }

        assert_eq!(dead, 1);
        let message = outbox.get(id).await.unwrap().unwrap();
        assert_eq!(message.state, OutboxState::Dead);
        assert_eq!(message.attempts, 3);
        assert_eq!(outbox.dead_letters().await.unwrap().len(), 1);

        // Dead messages are never claimed again
        assert_eq!(dispatcher.run_once(now).await.unwrap(), DispatchReport::default());
    }

    #[tokio::test]
    async fn test_unknown_event_type_fails() {
        let outbox = Arc::new(MemoryOutbox::new(1));
        let dispatcher = dispatcher(&outbox, Flaky::new(0));
        outbox.enqueue("other", json!({})).await.unwrap();

        let report = dispatcher.run_once(Utc::now()).await.unwrap();
        assert_eq!(report.dead, 1);
    }

    #[tokio::test]
    async fn test_append_draft_handler_replays_into_ledger() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = Arc::new(AuditLedger::new(store.clone()));
        let outbox = Arc::new(MemoryOutbox::new(5));
        let dispatcher = OutboxDispatcher::new(outbox.clone(), Duration::from_secs(1), Duration::from_millis(10))
            .register(AUDIT_APPEND_EVENT, Arc::new(AppendDraftHandler::new(ledger.clone())));

        let draft = AuditDraft::new("acme", AuditAction::Delete, "Document").entity_id("d-9");
        outbox
            .enqueue(AUDIT_APPEND_EVENT, serde_json::to_value(&draft).unwrap())
            .await
            .unwrap();

        store.set_unavailable(true);
        assert_eq!(dispatcher.run_once(Utc::now()).await.unwrap().retried, 1);

        store.set_unavailable(false);
        let later = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(dispatcher.run_once(later).await.unwrap().completed, 1);

        let entries = store.entries("acme", 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_id.as_deref(), Some("d-9"));
    }

    #[tokio::test]
    async fn test_enqueue_unavailable() {
        let outbox = MemoryOutbox::default();
        outbox.set_unavailable(true);
        assert!(matches!(
            outbox.enqueue("test", json!({})).await,
            Err(OutboxError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_completed_messages_are_removed() {
        let outbox = Arc::new(MemoryOutbox::new(5));
        let dispatcher = dispatcher(&outbox, Flaky::new(0));
        for n in 0..10 {
            outbox.enqueue("test", json!({"n": n})).await.unwrap();
        }

        assert_eq!(dispatcher.run_once(Utc::now()).await.unwrap().completed, 10);
        assert_eq!(outbox.len(), 0);
        assert!(matches!(
            outbox.complete(Uuid::new_v4()).await,
            Err(OutboxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lapsed_claim_is_reclaimed() {
        let outbox = MemoryOutbox::new(5).with_visibility_timeout(Duration::from_secs(30));
        let id = outbox.enqueue("test", json!({})).await.unwrap();
        let now = Utc::now();

        // Claimed, then the claimant disappears without complete or fail
        assert_eq!(outbox.claim_ready(now, 10).await.unwrap().len(), 1);
        assert_eq!(outbox.count(OutboxState::Processing), 1);
        assert!(outbox.claim_ready(now + chrono::Duration::seconds(10), 10).await.unwrap().is_empty());

        let reclaimed = outbox
            .claim_ready(now + chrono::Duration::seconds(31), 10)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, id);
        assert_eq!(reclaimed[0].attempts, 2);
    }
}
