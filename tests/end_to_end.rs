//! End-to-end tests for the assembled subsystem

use async_trait::async_trait;
use chrono::Utc;
use citadel::prelude::*;
use citadel_audit::{MemoryLedgerStore, SEED_HASH};
use citadel_cdn::RecordingCdnClient;
use citadel_pool::BoxError;
use citadel_tenancy::TenantPoolConfig;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Counts connections closed by drop.
struct TrackedConnection {
    closed: Arc<AtomicUsize>,
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingFactory {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl ConnectionFactory for CountingFactory {
    type Connection = TrackedConnection;

    async fn connect(&self, _config: &TenantPoolConfig) -> std::result::Result<TrackedConnection, BoxError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(TrackedConnection {
            closed: self.closed.clone(),
        })
    }
}

struct Harness {
    citadel: Citadel<CountingFactory>,
    factory: Arc<CountingFactory>,
    ledger_store: Arc<MemoryLedgerStore>,
    cdn: Arc<RecordingCdnClient>,
}

async fn harness() -> Harness {
    let directory = InMemoryTenantDirectory::new();
    directory.upsert(Tenant::new("acme"));
    directory.upsert(Tenant::new("globex"));
    directory.claim_domain("books.acme.io", "acme");
    directory.verify_domain("books.acme.io");

    let mut settings = Settings::default();
    settings.tenancy.base_domain = "example.com".to_string();
    settings.pool.acquire_timeout_ms = 50;
    settings.pool.drain_grace_secs = 1;

    let ledger_store = Arc::new(MemoryLedgerStore::new());
    let cdn = Arc::new(RecordingCdnClient::new());
    let factory = Arc::new(CountingFactory::default());
    let citadel = Citadel::builder(settings, Arc::new(directory), factory.clone())
        .ledger_store(ledger_store.clone())
        .cdn_client(cdn.clone())
        .build()
        .await
        .unwrap();

    Harness {
        citadel,
        factory,
        ledger_store,
        cdn,
    }
}

#[tokio::test]
async fn test_update_client_audits_and_invalidates() {
    let h = harness().await;
    let citadel = &h.citadel;
    let ttl = Duration::from_secs(300);

    let created = citadel
        .record(
            AuditDraft::new("acme", AuditAction::Create, "Client")
                .entity_id("c-1")
                .new_values(json!({"name": "Acme Ltd"})),
        )
        .await
        .unwrap();

    let cache = citadel.cache();
    cache
        .set("client:acme:c-1", &json!({"name": "Acme Ltd"}), ttl, &["client:acme:c-1", "clients:acme"])
        .await
        .unwrap();
    for page in 1..=3 {
        cache
            .set(&format!("clients:acme:page:{page}"), &page, ttl, &["clients:acme"])
            .await
            .unwrap();
    }
    cache
        .set("clients:globex:page:1", &1, ttl, &["clients:globex"])
        .await
        .unwrap();

    let outcome = citadel
        .record(
            AuditDraft::new("acme", AuditAction::Update, "Client")
                .actor("user-7")
                .entity_id("c-1")
                .old_values(json!({"name": "Acme Ltd", "tier": "gold"}))
                .new_values(json!({"name": "Acme Corp", "tier": "gold"})),
        )
        .await
        .unwrap();

    // One update entry, chained to the previous head.
    let updates = citadel
        .ledger()
        .query("acme", &AuditQuery::new().action(AuditAction::Update))
        .await
        .unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].entity_type, "Client");
    assert_eq!(outcome.entry.previous_hash, created.entry.content_hash);
    assert_eq!(outcome.entry.sequence, created.entry.sequence + 1);
    assert_eq!(outcome.entry.changed_fields, Some(vec!["name".to_string()]));
    assert!(citadel.verify_chain("acme").await.unwrap().valid);

    // Detail and every list page evicted; other tenants untouched.
    assert_eq!(cache.get::<serde_json::Value>("client:acme:c-1").await.unwrap(), None);
    for page in 1..=3 {
        assert_eq!(cache.get::<i32>(&format!("clients:acme:page:{page}")).await.unwrap(), None);
    }
    assert_eq!(cache.get::<i32>("clients:globex:page:1").await.unwrap(), Some(1));

    // A purge carrying the collection tag reached the CDN.
    assert!(citadel.cdn().drain(Duration::from_secs(5)).await);
    assert!(
        h.cdn
            .requests()
            .iter()
            .any(|request| request.tags.contains(&"clients:acme".to_string()))
    );
}

#[tokio::test]
async fn test_first_entry_links_to_seed() {
    let h = harness().await;
    let outcome = h
        .citadel
        .record(AuditDraft::new("globex", AuditAction::Delete, "Invoice").entity_id("inv-9"))
        .await
        .unwrap();
    assert_eq!(outcome.entry.sequence, 1);
    assert_eq!(outcome.entry.previous_hash, SEED_HASH);
    assert_eq!(outcome.tags, vec!["invoices:globex", "invoice:globex:inv-9"]);
}

#[tokio::test]
async fn test_concurrent_first_access_builds_one_pool() {
    let h = harness().await;
    let citadel = Arc::new(h.citadel);

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let citadel = citadel.clone();
            tokio::spawn(async move {
                let conn = citadel.get_connection("acme").await;
                tokio::time::sleep(Duration::from_millis(1)).await;
                conn.map(drop)
            })
        })
        .collect();

    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => {}
            Err(Error::ResourceExhausted { .. }) => exhausted += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(exhausted < 50);
    assert_eq!(citadel.pools().stats().pools_created, 1);
    let status = citadel.pools().status("acme").unwrap();
    assert!(status.size <= status.max);
}

#[tokio::test]
async fn test_acquire_beyond_max_times_out() {
    let h = harness().await;
    let mut leases = Vec::new();
    for _ in 0..10 {
        leases.push(h.citadel.get_connection("acme").await.unwrap());
    }

    let err = h.citadel.get_connection("acme").await.unwrap_err();
    assert!(matches!(err, Error::ResourceExhausted { .. }));
    assert!(err.is_retryable());

    drop(leases.pop());
    assert!(h.citadel.get_connection("acme").await.is_ok());
}

#[tokio::test]
async fn test_unknown_tenant() {
    let h = harness().await;
    let err = h.citadel.get_connection("initech").await.unwrap_err();
    assert!(matches!(err, Error::TenantNotFound(ref id) if id == "initech"));
}

#[tokio::test]
async fn test_host_resolution() {
    let h = harness().await;
    let c = &h.citadel;
    assert_eq!(c.resolve_host("acme.example.com").await.unwrap().as_deref(), Some("acme"));
    assert_eq!(c.resolve_host("books.acme.io").await.unwrap().as_deref(), Some("acme"));
    assert_eq!(c.resolve_host("www.example.com").await.unwrap(), None);
    assert_eq!(c.resolve_host("unknown.example.org").await.unwrap(), None);
}

#[tokio::test]
async fn test_ledger_outage_replays_through_outbox() {
    let h = harness().await;
    let citadel = &h.citadel;
    citadel
        .record(AuditDraft::new("acme", AuditAction::Create, "Case").entity_id("42"))
        .await
        .unwrap();

    h.ledger_store.set_unavailable(true);
    let err = citadel
        .record(AuditDraft::new("acme", AuditAction::Update, "Case").entity_id("42"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StorageUnavailable(_)));

    h.ledger_store.set_unavailable(false);
    let report = citadel.dispatcher().run_once(Utc::now()).await.unwrap();
    assert_eq!(report.completed, 1);
    assert!(citadel.outbox().dead_letters().await.unwrap().is_empty());

    let verification = citadel.verify_chain("acme").await.unwrap();
    assert!(verification.valid);
    assert_eq!(verification.entries_checked, 2);
}

#[tokio::test]
async fn test_cdn_outage_never_fails_the_write() {
    let h = harness().await;
    h.cdn.set_failing(true);

    let outcome = h
        .citadel
        .record(AuditDraft::new("acme", AuditAction::Update, "Pricelist").entity_id("p-1"))
        .await
        .unwrap();
    assert!(outcome.purge_scheduled);

    assert!(h.citadel.cdn().drain(Duration::from_secs(5)).await);
    assert_eq!(h.citadel.cdn().stats().failed, 1);
    assert!(h.citadel.verify_chain("acme").await.unwrap().valid);
}

#[tokio::test]
async fn test_start_and_shutdown() {
    let h = harness().await;
    h.citadel.start();
    let _conn = h.citadel.get_connection("acme").await.unwrap();
    drop(_conn);

    let report = h.citadel.shutdown().await;
    assert!(report.cdn_drained);
    assert_eq!(report.pools_drained, 1);
    assert_eq!(report.leases_abandoned, 0);
    assert!(!h.citadel.dispatcher().is_running());
    assert!(!h.citadel.retention().is_running());
}

#[tokio::test]
async fn test_lease_held_through_shutdown_closes_on_release() {
    let h = harness().await;
    let conn = h.citadel.get_connection("acme").await.unwrap();
    let opened = h.factory.opened.load(Ordering::SeqCst);

    let report = h.citadel.shutdown().await;
    assert_eq!(report.leases_abandoned, 1);
    // Idle connections are closed by the drain; the lease is still usable
    assert_eq!(h.factory.closed.load(Ordering::SeqCst), opened - 1);

    drop(conn);
    assert_eq!(h.factory.closed.load(Ordering::SeqCst), opened);
}

#[tokio::test]
async fn test_invalid_settings_rejected() {
    let mut settings = Settings::default();
    settings.cdn.enabled = true;
    let result = Citadel::builder(
        settings,
        Arc::new(InMemoryTenantDirectory::new()),
        Arc::new(CountingFactory::default()),
    )
    .build()
    .await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_file_ledger_from_settings() {
    let dir = tempfile::tempdir().unwrap();
    let directory = InMemoryTenantDirectory::new();
    directory.upsert(Tenant::new("acme"));

    let mut settings = Settings::default();
    settings.audit.ledger_dir = Some(dir.path().to_path_buf());

    let citadel = Citadel::builder(settings, Arc::new(directory), Arc::new(CountingFactory::default()))
        .build()
        .await
        .unwrap();
    citadel
        .record(AuditDraft::new("acme", AuditAction::Create, "Document").entity_id("d-1"))
        .await
        .unwrap();

    assert!(dir.path().join("acme.jsonl").exists());
    assert!(citadel.verify_chain("acme").await.unwrap().valid);
    assert!(citadel.outbox().dead_letters().await.unwrap().is_empty());
    citadel.shutdown().await;
}

#[tokio::test]
async fn test_cache_control_from_policy_table() {
    let directory = InMemoryTenantDirectory::new();
    let mut settings = Settings::default();
    settings.cdn.policies = vec![citadel::citadel_config::CachePolicySettings {
        pattern: "/public/**".to_string(),
        ttl_secs: 600,
        query: "exclude-all".to_string(),
        query_params: vec![],
    }];

    let citadel = Citadel::builder(settings, Arc::new(directory), Arc::new(CountingFactory::default()))
        .build()
        .await
        .unwrap();
    assert_eq!(citadel.cache_control("/public/logo.svg"), "public, max-age=600");
    assert_eq!(citadel.cache_control("/api/clients"), "private, no-cache");
    citadel.purge_all().await.unwrap();
    citadel.shutdown().await;
}
