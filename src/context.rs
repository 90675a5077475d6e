//! The assembled subsystem.
//!
//! [`Citadel`] is built once at startup from [`Settings`] and shared by `Arc`.
//! It owns the pool registry, the audit ledger with its outbox and retention
//! sweeper, the tagged cache, and the CDN invalidation queue.

use crate::bridge::{AuditCacheBridge, MutationOutcome};
use crate::error::Result;
#[cfg(not(feature = "redis"))]
use crate::error::Error;
use citadel_audit::{
    AUDIT_APPEND_EVENT, AppendDraftHandler, AuditDraft, AuditLedger, ChainVerification,
    FileLedgerStore, LedgerStore, MaskingConfig, MemoryLedgerStore, MemoryOutbox,
    OutboxDispatcher, OutboxStore, RetentionManager, RetentionPolicy,
};
use citadel_cache::{CacheStore, EntityTagMap, MemoryCacheStore, TaggedCache};
use citadel_cdn::{
    CachePolicyTable, CdnClient, HttpCdnClient, InvalidationCoordinator, NoopCdnClient,
    PurgeRequest,
};
use citadel_config::{Settings, Validate};
use citadel_pool::{ConnectionFactory, PoolRegistry, PooledConnection, RegistryOptions};
use citadel_tenancy::{TenantDirectory, TenantResolver};
use std::sync::Arc;
use tracing::{info, warn};

/// Summary of a graceful shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cdn_drained: bool,
    pub pools_drained: usize,
    /// Leases still held when the drain grace ran out. Each closes when its
    /// holder releases it.
    pub leases_abandoned: usize,
}

/// Assembles a [`Citadel`], with optional replacements for each backend.
pub struct CitadelBuilder<F: ConnectionFactory> {
    settings: Settings,
    directory: Arc<dyn TenantDirectory>,
    factory: Arc<F>,
    ledger_store: Option<Arc<dyn LedgerStore>>,
    outbox: Option<Arc<dyn OutboxStore>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    cdn_client: Option<Arc<dyn CdnClient>>,
    masking: MaskingConfig,
}

impl<F: ConnectionFactory> CitadelBuilder<F> {
    pub fn new(settings: Settings, directory: Arc<dyn TenantDirectory>, factory: Arc<F>) -> Self {
        Self {
            settings,
            directory,
            factory,
            ledger_store: None,
            outbox: None,
            cache_store: None,
            cdn_client: None,
            masking: MaskingConfig::default(),
        }
    }

    pub fn ledger_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.ledger_store = Some(store);
        self
    }

    pub fn outbox(mut self, outbox: Arc<dyn OutboxStore>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn cdn_client(mut self, client: Arc<dyn CdnClient>) -> Self {
        self.cdn_client = Some(client);
        self
    }

    pub fn masking(mut self, masking: MaskingConfig) -> Self {
        self.masking = masking;
        self
    }

    /// Validate settings and open every backend. Must run inside a Tokio runtime.
    pub async fn build(self) -> Result<Citadel<F>> {
        let settings = self.settings;
        settings.validate()?;

        let resolver = Arc::new(TenantResolver::new(self.directory.clone(), &settings.tenancy));
        let pools = Arc::new(PoolRegistry::new(
            resolver.clone(),
            self.factory,
            RegistryOptions {
                acquire_timeout: settings.pool.acquire_timeout(),
                teardown_grace: settings.pool.teardown_grace(),
                eviction_interval: settings.pool.eviction_interval(),
            },
        ));

        let ledger_store: Arc<dyn LedgerStore> = match (self.ledger_store, &settings.audit.ledger_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(FileLedgerStore::open(dir.clone()).await?),
            (None, None) => Arc::new(MemoryLedgerStore::new()),
        };
        let ledger = Arc::new(AuditLedger::with_masking(ledger_store, self.masking));

        let outbox: Arc<dyn OutboxStore> = match self.outbox {
            Some(outbox) => outbox,
            None => Arc::new(MemoryOutbox::new(settings.audit.outbox_max_attempts)),
        };
        let dispatcher = Arc::new(
            OutboxDispatcher::new(
                outbox.clone(),
                settings.audit.outbox_poll_interval(),
                settings.audit.outbox_base_backoff(),
            )
            .register(AUDIT_APPEND_EVENT, Arc::new(AppendDraftHandler::new(ledger.clone()))),
        );
        let retention = Arc::new(RetentionManager::new(
            ledger.clone(),
            self.directory,
            RetentionPolicy::new(
                settings.audit.standard_retention_days,
                settings.audit.compliance_retention_days,
            ),
            settings.audit.retention_sweep_interval(),
        ));

        let cache_store = match self.cache_store {
            Some(store) => store,
            None => default_cache_store(&settings).await?,
        };
        let cache = Arc::new(
            TaggedCache::new(cache_store)
                .with_default_ttl(settings.cache.default_ttl())
                .with_sweep_interval(settings.cache.expiry_sweep_interval()),
        );
        let tags = EntityTagMap::new().extend(&settings.cache.entity_tags)?;

        let cdn_client: Arc<dyn CdnClient> = match self.cdn_client {
            Some(client) => client,
            None if settings.cdn.enabled => Arc::new(HttpCdnClient::from_settings(&settings.cdn)?),
            None => Arc::new(NoopCdnClient::new(settings.cdn.base_url.clone())),
        };
        let cdn = Arc::new(InvalidationCoordinator::spawn(
            cdn_client,
            settings.cdn.queue_capacity,
        ));
        let policies = CachePolicyTable::from_settings(&settings.cdn.policies)?;

        let bridge = AuditCacheBridge::new(ledger.clone(), outbox.clone(), cache.clone(), tags)
            .with_cdn(cdn.clone());

        info!(
            base_domain = %settings.tenancy.base_domain,
            cdn_enabled = settings.cdn.enabled,
            cache_policies = policies.len(),
            "Citadel assembled"
        );

        Ok(Citadel {
            settings,
            resolver,
            pools,
            ledger,
            outbox,
            dispatcher,
            retention,
            cache,
            cdn,
            policies,
            bridge,
        })
    }
}

async fn default_cache_store(settings: &Settings) -> Result<Arc<dyn CacheStore>> {
    match &settings.cache.redis_url {
        None => Ok(Arc::new(MemoryCacheStore::new())),
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = citadel_cache::RedisCacheStore::connect(url, "citadel").await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(Error::Config(
            "cache.redis_url is set but the redis feature is not enabled".to_string(),
        )),
    }
}

/// Tenant resources and compliance services for one process.
pub struct Citadel<F: ConnectionFactory> {
    settings: Settings,
    resolver: Arc<TenantResolver>,
    pools: Arc<PoolRegistry<F>>,
    ledger: Arc<AuditLedger>,
    outbox: Arc<dyn OutboxStore>,
    dispatcher: Arc<OutboxDispatcher>,
    retention: Arc<RetentionManager>,
    cache: Arc<TaggedCache>,
    cdn: Arc<InvalidationCoordinator>,
    policies: CachePolicyTable,
    bridge: AuditCacheBridge,
}

impl<F: ConnectionFactory> Citadel<F> {
    pub fn builder(
        settings: Settings,
        directory: Arc<dyn TenantDirectory>,
        factory: Arc<F>,
    ) -> CitadelBuilder<F> {
        CitadelBuilder::new(settings, directory, factory)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn resolver(&self) -> &Arc<TenantResolver> {
        &self.resolver
    }

    pub fn pools(&self) -> &Arc<PoolRegistry<F>> {
        &self.pools
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    pub fn outbox(&self) -> &Arc<dyn OutboxStore> {
        &self.outbox
    }

    pub fn dispatcher(&self) -> &Arc<OutboxDispatcher> {
        &self.dispatcher
    }

    pub fn retention(&self) -> &Arc<RetentionManager> {
        &self.retention
    }

    pub fn cache(&self) -> &Arc<TaggedCache> {
        &self.cache
    }

    pub fn cdn(&self) -> &Arc<InvalidationCoordinator> {
        &self.cdn
    }

    pub fn policies(&self) -> &CachePolicyTable {
        &self.policies
    }

    pub fn bridge(&self) -> &AuditCacheBridge {
        &self.bridge
    }

    /// Map a request host to a tenant id. `None` routes to the shared site.
    pub async fn resolve_host(&self, host: &str) -> Result<Option<String>> {
        Ok(self.resolver.resolve_by_host(host).await?)
    }

    /// Lease a database connection for the tenant.
    pub async fn get_connection(&self, tenant_id: &str) -> Result<PooledConnection<F>> {
        Ok(self.pools.get_connection(tenant_id).await?)
    }

    /// Audit a mutation and invalidate cached views of the entity.
    pub async fn record(&self, draft: AuditDraft) -> Result<MutationOutcome> {
        self.bridge.record(draft).await
    }

    pub async fn verify_chain(&self, tenant_id: &str) -> Result<ChainVerification> {
        Ok(self.ledger.verify_chain(tenant_id, None).await?)
    }

    /// Purge the whole CDN zone. Callers must check administrative rights.
    pub async fn purge_all(&self) -> Result<()> {
        warn!("Full CDN purge requested");
        Ok(self.cdn.purge_now(&PurgeRequest::all()).await?)
    }

    /// `Cache-Control` value for a response path.
    pub fn cache_control(&self, path: &str) -> String {
        self.policies.cache_control(path)
    }

    /// Start idle eviction, cache expiry, outbox dispatch and retention sweeps.
    pub fn start(&self) {
        let started = [
            ("pool-eviction", self.pools.start_eviction()),
            ("cache-expiry", self.cache.start_expiry_sweep()),
            ("outbox-dispatch", self.dispatcher.start()),
            ("audit-retention", self.retention.start()),
        ];
        for (task, fresh) in started {
            if !fresh {
                warn!(task, "Background task already running");
            }
        }
        info!("Citadel background tasks started");
    }

    /// Stop background work, drain the CDN queue and then the pools.
    pub async fn shutdown(&self) -> ShutdownReport {
        let grace = self.settings.pool.drain_grace();

        self.dispatcher.stop().await;
        self.retention.stop().await;
        self.cache.stop_expiry_sweep().await;

        let cdn_drained = self.cdn.drain(grace).await;
        let outcomes = self.pools.shutdown(grace).await;
        let leases_abandoned = outcomes.iter().map(|(_, outcome)| outcome.abandoned).sum();

        if leases_abandoned > 0 {
            warn!(leases_abandoned, "Connections still leased after the drain grace will close when released");
        }
        info!(pools = outcomes.len(), cdn_drained, "Citadel shut down");

        ShutdownReport {
            cdn_drained,
            pools_drained: outcomes.len(),
            leases_abandoned,
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for Citadel<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Citadel")
            .field("base_domain", &self.settings.tenancy.base_domain)
            .field("pools", &self.pools.stats())
            .field("cdn", &self.cdn)
            .finish()
    }
}
