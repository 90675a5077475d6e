//! Background purge queue.
//!
//! [`InvalidationCoordinator`] owns a bounded channel drained by one worker
//! task. Callers schedule purges without waiting on the CDN; a full queue
//! rejects the request instead of blocking the write path. Shutdown either
//! drains the queue within a deadline or cancels outright.

use crate::client::CdnClient;
use crate::error::{CdnError, Result};
use crate::purge::PurgeRequest;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters since the coordinator started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub scheduled: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Rejected because the queue was full
    pub dropped: u64,
    /// Abandoned by a cancelling shutdown
    pub cancelled: u64,
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    cancelled: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

pub struct InvalidationCoordinator {
    client: Arc<dyn CdnClient>,
    sender: Mutex<Option<mpsc::Sender<PurgeRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: watch::Sender<bool>,
    counters: Arc<Counters>,
    capacity: usize,
}

impl InvalidationCoordinator {
    /// Start the worker. Must be called from within a Tokio runtime.
    pub fn spawn(client: Arc<dyn CdnClient>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let (cancel, cancel_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let worker = tokio::spawn(run_worker(
            client.clone(),
            receiver,
            cancel_rx,
            counters.clone(),
        ));

        Self {
            client,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            cancel,
            counters,
            capacity,
        }
    }

    pub fn client(&self) -> &Arc<dyn CdnClient> {
        &self.client
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Requests waiting in the queue.
    pub fn pending(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map(|sender| self.capacity - sender.capacity())
            .unwrap_or(0)
    }

    /// Queue a purge without waiting for it.
    pub fn schedule(&self, request: PurgeRequest) -> Result<()> {
        request.validate()?;

        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(CdnError::QueueClosed)?;
        match sender.try_send(request) {
            Ok(()) => {
                self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(request)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(tags = ?request.tags, urls = request.urls.len(), "Invalidation queue full, purge dropped");
                Err(CdnError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CdnError::QueueClosed),
        }
    }

    /// Queue a tag purge.
    pub fn schedule_tags<I, S>(&self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schedule(PurgeRequest::tags(tags))
    }

    /// Purge synchronously, bypassing the queue.
    pub async fn purge_now(&self, request: &PurgeRequest) -> Result<()> {
        let result = self.client.purge(request).await;
        match &result {
            Ok(()) => self.counters.succeeded.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.counters.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop accepting requests and let the worker finish the queue.
    ///
    /// Cancels whatever is left once `timeout` passes. Returns `true` when
    /// the queue emptied in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.sender.lock().take();
        let Some(mut handle) = self.worker.lock().take() else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => {
                info!("Invalidation queue drained");
                true
            }
            Err(_) => {
                warn!(?timeout, "Invalidation queue drain timed out, cancelling");
                let _ = self.cancel.send(true);
                let _ = handle.await;
                false
            }
        }
    }

    /// Cancel in-flight and queued purges and stop the worker.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let _ = self.cancel.send(true);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Invalidation coordinator stopped");
    }
}

impl Drop for InvalidationCoordinator {
    fn drop(&mut self) {
        let _ = self.cancel.send(true);
    }
}

impl std::fmt::Debug for InvalidationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationCoordinator")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn run_worker(
    client: Arc<dyn CdnClient>,
    mut receiver: mpsc::Receiver<PurgeRequest>,
    mut cancel: watch::Receiver<bool>,
    counters: Arc<Counters>,
) {
    debug!("Invalidation worker started");

    loop {
        let request = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            next = receiver.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                break;
            }
            result = client.purge(&request) => match result {
                Ok(()) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, tags = ?request.tags, "Queued CDN purge failed");
                }
            },
        }
    }

    receiver.close();
    while receiver.try_recv().is_ok() {
        counters.cancelled.fetch_add(1, Ordering::Relaxed);
    }
    debug!("Invalidation worker stopped");
}
