//! Restartable periodic background tasks.
//!
//! Pool eviction, audit retention, cache expiry and outbox dispatch each run on
//! their own [`PeriodicTask`]. A task can be stopped and started again any
//! number of times; the first tick fires one full interval after `start`.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A named job that runs on a fixed interval in the background.
pub struct PeriodicTask {
    name: String,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl PeriodicTask {
    /// Create a stopped task.
    ///
    /// # Examples
    ///
    /// ```
    /// use citadel_core::PeriodicTask;
    /// use std::time::Duration;
    ///
    /// let task = PeriodicTask::new("idle-eviction", Duration::from_secs(30));
    /// assert!(!task.is_running());
    /// ```
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            running: Mutex::new(None),
        }
    }

    /// Task name used in log output.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking. Returns `false` if the task is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F, Fut>(&self, tick: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock();
        if let Some(current) = running.as_ref()
            && !current.handle.is_finished()
        {
            tracing::warn!(task = %self.name, "Periodic task already running");
            return false;
        }

        let (stop, mut stop_rx) = watch::channel(false);
        let name = self.name.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!(task = %name, "Periodic task stopped");
        });

        tracing::info!(task = %self.name, interval = ?self.interval, "Periodic task started");
        *running = Some(Running { stop, handle });
        true
    }

    /// Stop the task and wait for an in-progress tick to finish.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        let _ = running.stop.send(true);
        if let Err(e) = running.handle.await
            && e.is_panic()
        {
            tracing::error!(task = %self.name, "Periodic task panicked: {}", e);
        }
    }

    /// Whether the task is currently scheduled.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.handle.abort();
        }
    }
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}
