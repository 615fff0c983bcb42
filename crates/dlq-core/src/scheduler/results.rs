//! Worker messages: status updates and result reconciliation.

use std::future::Future;

use tokio::sync::watch;

use super::{unix_now, ResultChannels, Scheduler};
use crate::retry::{run_with_retry, ErrorKind};
use crate::task::{ResultMessage, StatusMessage, TaskStatus};

impl Scheduler {
    pub(super) async fn result_loop(
        self,
        mut channels: ResultChannels,
        mut stop: watch::Receiver<bool>,
    ) -> ResultChannels {
        tracing::info!("result loop started");
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                Some(status) = channels.status.recv() => self.on_status(status).await,
                Some(result) = channels.results.recv() => {
                    let this = self.clone();
                    tokio::spawn(async move { this.reconcile(result).await });
                }
            }
        }
        tracing::info!("result loop stopped");
        channels
    }

    /// Record the status text of a running task and forward it. Updates for
    /// tasks no longer running are dropped.
    pub async fn on_status(&self, status: StatusMessage) {
        {
            let mut state = self.inner.state.lock().await;
            if !state.running.contains(status.task_id) {
                return;
            }
            state.running.update_status(status.task_id, &status.text);
        }
        let this = self.clone();
        tokio::spawn(async move { this.inner.notifier.send_status(&status).await });
    }

    /// Retire a finished task: leave the running registry, release its
    /// counters, then persist and deliver the result. Results for tasks that
    /// are not running (cancelled, duplicates) are dropped.
    pub async fn reconcile(&self, result: ResultMessage) {
        let task_id = result.task_id;
        let (task, marks) = {
            let mut state = self.inner.state.lock().await;
            let Some(task) = state.running.remove_task(task_id) else {
                tracing::debug!(task_id, "result for a task that is not running; dropped");
                return;
            };
            let req = &task.request;
            state
                .ledger
                .remove_run(req.user_id, &req.site, &task.group, &task.proxy, unix_now());
            (task, state.ledger.take_dirty_marks())
        };
        self.inner.wake.notify_one();
        self.persist_dirty(marks).await;

        let grace = self.inner.settings.terminate_grace;
        let handle = task.handle;
        tokio::spawn(async move {
            if let Err(e) = handle.reap(grace).await {
                tracing::warn!(task_id, "reap worker: {:#}", e);
            }
        });

        tracing::info!(task_id, status = result.status.as_str(), "task finished");
        if result.status == TaskStatus::Cancelled {
            self.retry_db("delete request", || self.inner.db.delete_request(task_id))
                .await;
            return;
        }
        self.finalize(result).await;
    }

    /// Persist a terminal result, record history, drop the request row and
    /// deliver. Each database step is retried; failures are logged and the
    /// remaining steps still run.
    pub(super) async fn finalize(&self, result: ResultMessage) {
        let db = &self.inner.db;
        let task_id = result.task_id;
        self.retry_db("save result", || db.save_result(&result)).await;
        self.retry_db("add history", || db.add_history(&result)).await;
        self.retry_db("delete request", || db.delete_request(task_id))
            .await;
        self.deliver(result).await;
    }

    /// Send a persisted result; the row is removed only once accepted.
    pub(super) async fn deliver(&self, result: ResultMessage) {
        let task_id = result.task_id;
        if self.inner.notifier.send_result(&result).await {
            self.retry_db("delete result", || self.inner.db.delete_result(task_id))
                .await;
        } else {
            tracing::warn!(task_id, "result not delivered; kept for the next start");
        }
    }

    async fn retry_db<F, Fut>(&self, what: &str, f: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let classify = |_: &anyhow::Error| ErrorKind::Connection;
        match run_with_retry(&self.inner.settings.db_retry, classify, f).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{} failed: {:#}", what, e);
                false
            }
        }
    }
}
