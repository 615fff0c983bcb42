//! Admission-control scheduler.
//!
//! Owns the admission ledger, the waiting and running registries and the
//! site router behind one async mutex, and drives three loops:
//!
//! - the task loop promotes waiting tasks to running workers on every tick
//!   and whenever something changes (admission, finish, cancel, reload);
//! - the result loop applies worker status updates and reconciles results;
//! - the flush loop evicts idle per-user counters and persists rate marks.
//!
//! The mutex is never held across database, notifier or process waits.

mod admission;
mod cancel;
mod config_sync;
mod export;
mod launch;
mod results;
mod state;
mod tick;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::config::{DlqConfig, WorkerConfig};
use crate::notify::Notifier;
use crate::retry::RetryPolicy;
use crate::store::{RateStore, TaskDb};
use crate::task::{ResultMessage, StatusMessage};
use crate::worker::{WorkerChannels, WorkerLauncher};

use state::QueueState;

pub use export::{QueueExport, SiteCheck, SiteLists};

/// Timers and launch parameters taken from [`DlqConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub flush_interval: Duration,
    pub admission_timeout: Duration,
    pub terminate_grace: Duration,
    pub restore_tasks: bool,
    /// Retries for database writes outside the admission path.
    pub db_retry: RetryPolicy,
    pub worker: WorkerConfig,
}

impl SchedulerSettings {
    pub fn from_config(cfg: &DlqConfig) -> Self {
        Self {
            tick_interval: cfg.tick_interval(),
            flush_interval: cfg.flush_interval(),
            admission_timeout: cfg.admission_timeout(),
            terminate_grace: cfg.terminate_grace(),
            restore_tasks: cfg.restore_tasks,
            db_retry: RetryPolicy::default(),
            worker: cfg.worker.clone(),
        }
    }
}

/// Receiving ends of the worker channels; owned by the result loop while it runs.
struct ResultChannels {
    status: mpsc::UnboundedReceiver<StatusMessage>,
    results: mpsc::UnboundedReceiver<ResultMessage>,
}

struct LoopHandle<T> {
    stop: watch::Sender<bool>,
    join: JoinHandle<T>,
}

impl<T> LoopHandle<T> {
    async fn shutdown(self) -> Option<T> {
        let _ = self.stop.send(true);
        match self.join.await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("scheduler loop ended abnormally: {}", e);
                None
            }
        }
    }
}

#[derive(Default)]
struct Loops {
    tasks: Option<LoopHandle<()>>,
    results: Option<LoopHandle<ResultChannels>>,
    flush: Option<LoopHandle<()>>,
}

struct Inner {
    state: Mutex<QueueState>,
    db: TaskDb,
    rates: RateStore,
    notifier: Arc<dyn Notifier>,
    launcher: Arc<dyn WorkerLauncher>,
    settings: SchedulerSettings,
    wake: Notify,
    channels: WorkerChannels,
    /// Present while the result loop is stopped.
    receivers: Mutex<Option<ResultChannels>>,
    loops: Mutex<Loops>,
}

/// Cheap to clone; all clones drive the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        config: &DlqConfig,
        db: TaskDb,
        notifier: Arc<dyn Notifier>,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        Self::with_settings(
            SchedulerSettings::from_config(config),
            config,
            db,
            notifier,
            launcher,
        )
    }

    pub fn with_settings(
        settings: SchedulerSettings,
        config: &DlqConfig,
        db: TaskDb,
        notifier: Arc<dyn Notifier>,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let rates = RateStore::new(db.clone(), config.rate_ttl_secs);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::new(&config.queue)),
                db,
                rates,
                notifier,
                launcher,
                settings,
                wake: Notify::new(),
                channels: WorkerChannels {
                    status: status_tx,
                    results: results_tx,
                },
                receivers: Mutex::new(Some(ResultChannels {
                    status: status_rx,
                    results: results_rx,
                })),
                loops: Mutex::new(Loops::default()),
            }),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.inner.settings
    }

    /// Restore rate marks, start every loop, then replay persisted requests
    /// and re-deliver persisted results.
    pub async fn start(&self) -> Result<()> {
        self.restore_marks().await;
        self.start_results().await;
        self.start_tasks().await;
        if self.inner.settings.restore_tasks {
            self.restore().await?;
        }
        self.start_flush().await;
        tracing::info!("scheduler started");
        Ok(())
    }

    /// Stop every loop, terminate running workers and persist rate marks.
    /// Waiting tasks stay queued. Requests of terminated workers stay
    /// persisted and are replayed on the next start.
    pub async fn stop(&self) -> Result<()> {
        self.stop_tasks().await;
        self.stop_results().await;
        let flush = self.inner.loops.lock().await.flush.take();
        if let Some(handle) = flush {
            handle.shutdown().await;
        }

        let (running, marks) = {
            let mut state = self.inner.state.lock().await;
            let running = state.running.drain();
            let now = unix_now();
            for task in &running {
                let req = &task.request;
                state
                    .ledger
                    .remove_run(req.user_id, &req.site, &task.group, &task.proxy, now);
            }
            (running, state.ledger.collect_marks())
        };
        let grace = self.inner.settings.terminate_grace;
        let stops = running.into_iter().map(|task| async move {
            if let Err(e) = task.handle.terminate(grace).await {
                tracing::warn!(task_id = task.task_id, "terminate worker: {:#}", e);
            }
        });
        join_all(stops).await;

        self.inner.rates.put_all(&marks).await?;
        tracing::info!(marks = marks.len(), "scheduler stopped");
        Ok(())
    }

    /// Seed the ledger with launch times persisted before the last stop.
    async fn restore_marks(&self) {
        match self.inner.rates.load_all().await {
            Ok(snapshot) => self.inner.state.lock().await.ledger.restore(snapshot),
            Err(e) => tracing::warn!("could not load rate marks: {:#}", e),
        }
        match self.inner.rates.purge_expired().await {
            Ok(n) if n > 0 => tracing::debug!(purged = n, "expired rate marks removed"),
            Ok(_) => {}
            Err(e) => tracing::warn!("could not purge rate marks: {:#}", e),
        }
    }

    pub async fn start_tasks(&self) {
        let mut loops = self.inner.loops.lock().await;
        if loops.tasks.is_some() {
            return;
        }
        let (stop, rx) = watch::channel(false);
        let join = tokio::spawn(self.clone().tick_loop(rx));
        loops.tasks = Some(LoopHandle { stop, join });
    }

    pub async fn stop_tasks(&self) {
        let handle = self.inner.loops.lock().await.tasks.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    pub async fn start_results(&self) {
        let mut loops = self.inner.loops.lock().await;
        if loops.results.is_some() {
            return;
        }
        let Some(channels) = self.inner.receivers.lock().await.take() else {
            tracing::warn!("result channels missing; result loop not started");
            return;
        };
        let (stop, rx) = watch::channel(false);
        let join = tokio::spawn(self.clone().result_loop(channels, rx));
        loops.results = Some(LoopHandle { stop, join });
    }

    /// Stop draining worker messages. Messages sent meanwhile stay queued
    /// in the channels until the loop is started again.
    pub async fn stop_results(&self) {
        let handle = self.inner.loops.lock().await.results.take();
        if let Some(handle) = handle {
            if let Some(channels) = handle.shutdown().await {
                *self.inner.receivers.lock().await = Some(channels);
            }
        }
    }

    async fn start_flush(&self) {
        let mut loops = self.inner.loops.lock().await;
        if loops.flush.is_some() {
            return;
        }
        let (stop, rx) = watch::channel(false);
        let join = tokio::spawn(self.clone().flush_loop(rx));
        loops.flush = Some(LoopHandle { stop, join });
    }

    async fn flush_loop(self, mut stop: watch::Receiver<bool>) {
        let period = self.inner.settings.flush_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tracing::debug!(period_secs = period.as_secs(), "flush loop started");
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = interval.tick() => self.flush().await,
            }
        }
        tracing::debug!("flush loop stopped");
    }

    /// Evict idle users and persist every counter's rate marks.
    pub async fn flush(&self) {
        let outcome = self.inner.state.lock().await.ledger.flush(unix_now());
        if let Err(e) = self.inner.rates.put_all(&outcome.marks).await {
            tracing::warn!("persist rate marks: {:#}", e);
        }
        if let Err(e) = self.inner.rates.purge_expired().await {
            tracing::warn!("purge rate marks: {:#}", e);
        }
        tracing::debug!(
            evicted = outcome.evicted.len(),
            marks = outcome.marks.len(),
            "ledger flushed"
        );
    }

    /// Persist the marks touched since the last call.
    async fn persist_dirty(&self, marks: Vec<(String, crate::stats::RateMarks)>) {
        if marks.is_empty() {
            return;
        }
        if let Err(e) = self.inner.rates.put_all(&marks).await {
            tracing::warn!("persist rate marks: {:#}", e);
        }
    }
}

/// Await every future; order of completion is irrelevant.
async fn join_all<I, F>(futures: I)
where
    I: IntoIterator<Item = F>,
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let mut set = tokio::task::JoinSet::new();
    for f in futures {
        set.spawn(f);
    }
    while set.join_next().await.is_some() {}
}

/// Seconds since the Unix epoch, as used by rate marks.
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
