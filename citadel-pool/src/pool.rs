//! A single tenant's connection pool.
//!
//! Concurrency is bounded by a semaphore holding one permit per allowed live
//! connection. A lease owns its permit, so the number of leased connections
//! never exceeds `max`.

use crate::error::{PoolError, Result};
use crate::factory::ConnectionFactory;
use citadel_tenancy::{PoolSizing, TenantPoolConfig};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct IdleConnection<C> {
    conn: C,
    since: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    /// Leased plus idle plus connections being opened
    live: usize,
    leased: usize,
    sizing: PoolSizing,
    /// Permits still owed after a shrink; forgotten as leases return
    retiring: usize,
    last_activity: Instant,
}

struct Shared<F: ConnectionFactory> {
    config: TenantPoolConfig,
    factory: Arc<F>,
    acquire_timeout: Duration,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState<F::Connection>>,
    accepting: AtomicBool,
    waiting: AtomicUsize,
}

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub tenant_id: String,
    pub size: usize,
    pub idle: usize,
    pub leased: usize,
    pub waiting: usize,
    pub min: usize,
    pub max: usize,
    pub accepting: bool,
}

/// Result of draining a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Idle connections closed
    pub closed: usize,
    /// Leases still outstanding when the grace period ran out
    pub abandoned: usize,
}

/// Connection pool for one tenant. Cheap to clone.
pub struct TenantPool<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for TenantPool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<F: ConnectionFactory> TenantPool<F> {
    /// Create a pool and warm `min` connections.
    ///
    /// Warm-up failures are logged, not returned; the pool opens connections
    /// on demand once the database is reachable.
    pub async fn open(config: TenantPoolConfig, factory: Arc<F>, acquire_timeout: Duration) -> Self {
        let sizing = config.sizing;
        let pool = Self {
            shared: Arc::new(Shared {
                semaphore: Arc::new(Semaphore::new(sizing.max)),
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(sizing.max),
                    live: 0,
                    leased: 0,
                    sizing,
                    retiring: 0,
                    last_activity: Instant::now(),
                }),
                accepting: AtomicBool::new(true),
                waiting: AtomicUsize::new(0),
                acquire_timeout,
                factory,
                config,
            }),
        };

        let warmed = pool.warm().await;
        info!(
            tenant = %pool.tenant_id(),
            tier = %pool.shared.config.tier,
            min = sizing.min,
            max = sizing.max,
            warmed,
            "Tenant pool created"
        );
        pool
    }

    pub fn tenant_id(&self) -> &str {
        &self.shared.config.tenant_id
    }

    pub fn config(&self) -> &TenantPoolConfig {
        &self.shared.config
    }

    /// Current bounds and timeouts
    pub fn sizing(&self) -> PoolSizing {
        self.shared.state.lock().sizing
    }

    /// Lease a connection, waiting up to the acquire timeout for a slot.
    pub async fn acquire(&self) -> Result<PooledConnection<F>> {
        let shared = &self.shared;
        if !shared.accepting.load(Ordering::Acquire) {
            return Err(PoolError::Closed(shared.config.tenant_id.clone()));
        }

        shared.waiting.fetch_add(1, Ordering::SeqCst);
        let permit = tokio::time::timeout(
            shared.acquire_timeout,
            shared.semaphore.clone().acquire_owned(),
        )
        .await;
        shared.waiting.fetch_sub(1, Ordering::SeqCst);

        let permit = match permit {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed(shared.config.tenant_id.clone())),
            Err(_) => {
                warn!(
                    tenant = %shared.config.tenant_id,
                    timeout = ?shared.acquire_timeout,
                    "Timed out waiting for a pooled connection"
                );
                return Err(PoolError::ResourceExhausted {
                    tenant_id: shared.config.tenant_id.clone(),
                    timeout: shared.acquire_timeout,
                });
            }
        };

        // Prefer the most recently used idle connection
        loop {
            let candidate = {
                let mut state = shared.state.lock();
                state.last_activity = Instant::now();
                state.idle.pop_back()
            };

            let Some(mut idle) = candidate else {
                break;
            };

            if shared.factory.is_valid(&mut idle.conn).await {
                return Ok(self.lease(idle.conn, permit));
            }

            debug!(tenant = %shared.config.tenant_id, "Discarding invalid idle connection");
            shared.state.lock().live -= 1;
        }

        shared.state.lock().live += 1;
        match self.connect().await {
            Ok(conn) => Ok(self.lease(conn, permit)),
            Err(e) => {
                shared.state.lock().live -= 1;
                Err(e)
            }
        }
    }

    fn lease(&self, conn: F::Connection, permit: OwnedSemaphorePermit) -> PooledConnection<F> {
        self.shared.state.lock().leased += 1;
        PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            broken: false,
            shared: self.shared.clone(),
        }
    }

    async fn connect(&self) -> Result<F::Connection> {
        let shared = &self.shared;
        let timeout = shared.state.lock().sizing.connect_timeout;
        let tenant_id = &shared.config.tenant_id;

        match tokio::time::timeout(timeout, shared.factory.connect(&shared.config)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => {
                warn!(tenant = %tenant_id, error = %e, "Connection attempt failed");
                Err(PoolError::Connect {
                    tenant_id: tenant_id.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => Err(PoolError::ConnectTimeout {
                tenant_id: tenant_id.clone(),
                timeout,
            }),
        }
    }

    async fn warm(&self) -> usize {
        let mut warmed = 0;
        loop {
            {
                let mut state = self.shared.state.lock();
                if state.live >= state.sizing.min {
                    break;
                }
                state.live += 1;
            }

            match self.connect().await {
                Ok(conn) => {
                    self.shared.state.lock().idle.push_back(IdleConnection {
                        conn,
                        since: Instant::now(),
                    });
                    warmed += 1;
                }
                Err(e) => {
                    self.shared.state.lock().live -= 1;
                    warn!(tenant = %self.tenant_id(), error = %e, "Pool warm-up incomplete");
                    break;
                }
            }
        }
        warmed
    }

    /// Close idle connections older than the idle timeout, keeping `min`.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let evicted: Vec<F::Connection> = {
            let mut state = self.shared.state.lock();
            let idle_timeout = state.sizing.idle_timeout;
            let mut evicted = Vec::new();

            // Oldest connections sit at the front
            while state.live > state.sizing.min {
                match state.idle.front() {
                    Some(front) if now.duration_since(front.since) >= idle_timeout => {
                        if let Some(idle) = state.idle.pop_front() {
                            state.live -= 1;
                            evicted.push(idle.conn);
                        }
                    }
                    _ => break,
                }
            }
            evicted
        };

        let count = evicted.len();
        if count > 0 {
            debug!(tenant = %self.tenant_id(), count, "Evicted idle connections");
        }
        count
    }

    /// No leases out and no activity within `grace`.
    pub fn is_idle_for(&self, grace: Duration) -> bool {
        let state = self.shared.state.lock();
        state.leased == 0
            && self.shared.waiting.load(Ordering::SeqCst) == 0
            && state.last_activity.elapsed() >= grace
    }

    /// Change pool bounds without downtime.
    ///
    /// Growing adds permits immediately. Shrinking retires free permits now
    /// and the rest as leases come back; surplus idle connections are closed.
    pub fn resize(&self, min: usize, max: usize) -> Result<()> {
        if max == 0 || min > max {
            return Err(PoolError::InvalidSizing(format!(
                "min {} / max {} for tenant {}",
                min,
                max,
                self.tenant_id()
            )));
        }

        let surplus: Vec<F::Connection> = {
            let mut state = self.shared.state.lock();
            let old_max = state.sizing.max;
            state.sizing = state.sizing.with_bounds(min, max);

            if max > old_max {
                let mut grow = max - old_max;
                let cancelled = grow.min(state.retiring);
                state.retiring -= cancelled;
                grow -= cancelled;
                if grow > 0 {
                    self.shared.semaphore.add_permits(grow);
                }
            } else if max < old_max {
                let shrink = old_max - max;
                let forgotten = self.shared.semaphore.forget_permits(shrink);
                state.retiring += shrink - forgotten;
            }

            let mut surplus = Vec::new();
            while state.live > max {
                match state.idle.pop_front() {
                    Some(idle) => {
                        state.live -= 1;
                        surplus.push(idle.conn);
                    }
                    None => break,
                }
            }
            surplus
        };

        info!(
            tenant = %self.tenant_id(),
            min,
            max,
            closed = surplus.len(),
            "Tenant pool resized"
        );
        Ok(())
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            tenant_id: self.shared.config.tenant_id.clone(),
            size: state.live,
            idle: state.idle.len(),
            leased: state.leased,
            waiting: self.shared.waiting.load(Ordering::SeqCst),
            min: state.sizing.min,
            max: state.sizing.max,
            accepting: self.shared.accepting.load(Ordering::Acquire),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting leases, wait up to `grace` for outstanding leases,
    /// then close every idle connection.
    ///
    /// Leases that outlive the grace period are closed when they are
    /// released.
    pub async fn drain(&self, grace: Duration) -> DrainOutcome {
        self.shared.accepting.store(false, Ordering::Release);
        // Wakes waiters with a closed error
        self.shared.semaphore.close();

        let start = Instant::now();
        loop {
            let leased = self.shared.state.lock().leased;
            if leased == 0 {
                break;
            }
            if start.elapsed() >= grace {
                warn!(
                    tenant = %self.tenant_id(),
                    leased,
                    "Pool drain timeout reached with leases outstanding"
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        let (closed, abandoned) = {
            let mut state = self.shared.state.lock();
            let closed: Vec<_> = state.idle.drain(..).collect();
            state.live -= closed.len();
            (closed.len(), state.leased)
        };

        info!(tenant = %self.tenant_id(), closed, abandoned, "Tenant pool drained");
        DrainOutcome { closed, abandoned }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for TenantPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantPool").field("status", &self.status()).finish()
    }
}

impl<F: ConnectionFactory> Shared<F> {
    fn give_back(&self, mut conn: F::Connection, broken: bool, permit: OwnedSemaphorePermit) {
        let discard = broken || self.factory.has_broken(&mut conn);

        let mut state = self.state.lock();
        state.leased -= 1;
        state.last_activity = Instant::now();

        if discard || !self.accepting.load(Ordering::Acquire) || state.live > state.sizing.max {
            state.live -= 1;
            if discard {
                debug!(tenant = %self.config.tenant_id, "Discarded broken connection");
            }
            // drop the connection after releasing the lock
            let retire = state.retiring > 0;
            if retire {
                state.retiring -= 1;
            }
            drop(state);
            drop(conn);
            if retire {
                permit.forget();
            }
            return;
        }

        state.idle.push_back(IdleConnection {
            conn,
            since: Instant::now(),
        });

        if state.retiring > 0 {
            state.retiring -= 1;
            permit.forget();
        }
    }
}

/// A leased connection. Dropping it returns the connection to its pool.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    permit: Option<OwnedSemaphorePermit>,
    broken: bool,
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    pub fn tenant_id(&self) -> &str {
        &self.shared.config.tenant_id
    }

    /// Close this connection on release instead of returning it to the pool
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_marked_broken(&self) -> bool {
        self.broken
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("connection is present until drop"),
        }
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("connection is present until drop"),
        }
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let (Some(conn), Some(permit)) = (self.conn.take(), self.permit.take()) {
            self.shared.give_back(conn, self.broken, permit);
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("tenant_id", &self.tenant_id())
            .field("broken", &self.broken)
            .finish()
    }
}
