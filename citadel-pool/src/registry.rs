//! Registry of per-tenant pools.

use crate::error::{PoolError, Result};
use crate::factory::ConnectionFactory;
use crate::pool::{DrainOutcome, PoolStatus, PooledConnection, TenantPool};
use citadel_core::PeriodicTask;
use citadel_tenancy::TenantResolver;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// Registry timings.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Wait budget for a free connection slot
    pub acquire_timeout: Duration,
    /// A pool with no activity for this long is torn down by `evict_idle`
    pub teardown_grace: Duration,
    /// Interval of the background eviction sweep
    pub eviction_interval: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(5),
            teardown_grace: Duration::from_secs(600),
            eviction_interval: Duration::from_secs(30),
        }
    }
}

/// Result of one eviction sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub connections_closed: usize,
    pub pools_torn_down: usize,
}

/// Registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub pools: usize,
    pub pools_created: u64,
    pub pools_torn_down: u64,
}

/// Owns one [`TenantPool`] per tenant, created on first use.
pub struct PoolRegistry<F: ConnectionFactory> {
    resolver: Arc<TenantResolver>,
    factory: Arc<F>,
    options: RegistryOptions,
    pools: DashMap<String, TenantPool<F>>,
    creation_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    pools_created: AtomicU64,
    pools_torn_down: AtomicU64,
    eviction: PeriodicTask,
}

impl<F: ConnectionFactory> PoolRegistry<F> {
    pub fn new(resolver: Arc<TenantResolver>, factory: Arc<F>, options: RegistryOptions) -> Self {
        Self {
            eviction: PeriodicTask::new("pool-eviction", options.eviction_interval),
            resolver,
            factory,
            options,
            pools: DashMap::new(),
            creation_locks: DashMap::new(),
            pools_created: AtomicU64::new(0),
            pools_torn_down: AtomicU64::new(0),
        }
    }

    /// Lease a connection for `tenant_id`, creating its pool on first use.
    ///
    /// Concurrent first requests for the same tenant build exactly one pool.
    pub async fn get_connection(&self, tenant_id: &str) -> Result<PooledConnection<F>> {
        // A pool torn down between lookup and acquire reports Closed;
        // one retry picks up its replacement.
        let mut attempts = 0;
        loop {
            attempts += 1;
            let pool = self.pool_for(tenant_id).await?;
            match pool.acquire().await {
                Err(PoolError::Closed(_)) if attempts < 2 => {
                    debug!(tenant = %tenant_id, "Pool closed during acquire, retrying");
                    continue;
                }
                other => return other,
            }
        }
    }

    async fn pool_for(&self, tenant_id: &str) -> Result<TenantPool<F>> {
        if let Some(pool) = self.existing(tenant_id) {
            return Ok(pool);
        }

        let lock = self
            .creation_locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let result = self.create_pool(tenant_id, &lock).await;

        // Last one out removes the lock, so unknown ids leave nothing behind.
        drop(lock);
        self.creation_locks
            .remove_if(tenant_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn create_pool(&self, tenant_id: &str, lock: &AsyncMutex<()>) -> Result<TenantPool<F>> {
        let _guard = lock.lock().await;

        if let Some(pool) = self.existing(tenant_id) {
            return Ok(pool);
        }

        let config = self.resolver.resolve_config(tenant_id).await?;
        let pool = TenantPool::open(config, self.factory.clone(), self.options.acquire_timeout).await;
        self.pools.insert(tenant_id.to_string(), pool.clone());
        self.pools_created.fetch_add(1, Ordering::Relaxed);
        Ok(pool)
    }

    fn existing(&self, tenant_id: &str) -> Option<TenantPool<F>> {
        self.pools
            .get(tenant_id)
            .map(|entry| entry.value().clone())
            .filter(TenantPool::is_accepting)
    }

    /// Return a connection to its pool. Same as dropping it.
    pub fn release(&self, connection: PooledConnection<F>) {
        drop(connection);
    }

    /// Close idle connections past their idle timeout and tear down pools
    /// unused for longer than the teardown grace.
    pub async fn evict_idle(&self) -> EvictionReport {
        let mut report = EvictionReport::default();
        let pools: Vec<TenantPool<F>> = self.pools.iter().map(|e| e.value().clone()).collect();
        let grace = self.options.teardown_grace;

        for pool in pools {
            report.connections_closed += pool.evict_idle();

            if !pool.is_idle_for(grace) {
                continue;
            }

            // Recheck under the shard lock so a pool picked up in between survives
            let removed = self
                .pools
                .remove_if(pool.tenant_id(), |_, p| p.is_idle_for(grace));

            if let Some((tenant_id, pool)) = removed {
                let outcome = pool.drain(Duration::ZERO).await;
                report.connections_closed += outcome.closed;
                report.pools_torn_down += 1;
                self.pools_torn_down.fetch_add(1, Ordering::Relaxed);
                info!(tenant = %tenant_id, "Tore down idle tenant pool");
            }
        }

        if report != EvictionReport::default() {
            debug!(
                closed = report.connections_closed,
                torn_down = report.pools_torn_down,
                "Eviction sweep finished"
            );
        }
        report
    }

    /// Run `evict_idle` on the configured interval.
    pub fn start_eviction(self: &Arc<Self>) -> bool {
        let registry: Weak<Self> = Arc::downgrade(self);
        self.eviction.start(move || {
            let registry = registry.clone();
            async move {
                if let Some(registry) = registry.upgrade() {
                    registry.evict_idle().await;
                }
            }
        })
    }

    pub async fn stop_eviction(&self) {
        self.eviction.stop().await;
    }

    /// Change a live pool's bounds.
    pub fn resize(&self, tenant_id: &str, min: usize, max: usize) -> Result<()> {
        let pool = self
            .existing(tenant_id)
            .ok_or_else(|| PoolError::TenantNotFound(tenant_id.to_string()))?;
        pool.resize(min, max)
    }

    pub fn status(&self, tenant_id: &str) -> Option<PoolStatus> {
        self.pools.get(tenant_id).map(|p| p.status())
    }

    pub fn statuses(&self) -> Vec<PoolStatus> {
        let mut all: Vec<PoolStatus> = self.pools.iter().map(|p| p.status()).collect();
        all.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        all
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            pools: self.pools.len(),
            pools_created: self.pools_created.load(Ordering::Relaxed),
            pools_torn_down: self.pools_torn_down.load(Ordering::Relaxed),
        }
    }

    /// Drain every pool concurrently, each waiting up to `grace`.
    pub async fn shutdown(&self, grace: Duration) -> Vec<(String, DrainOutcome)> {
        self.eviction.stop().await;

        let tenants: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        let pools: Vec<(String, TenantPool<F>)> = tenants
            .into_iter()
            .filter_map(|tenant| self.pools.remove(&tenant))
            .collect();

        info!(pools = pools.len(), grace = ?grace, "Shutting down pool registry");

        futures::future::join_all(pools.into_iter().map(|(tenant, pool)| async move {
            let outcome = pool.drain(grace).await;
            (tenant, outcome)
        }))
        .await
    }
}
