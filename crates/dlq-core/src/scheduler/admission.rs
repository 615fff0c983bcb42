//! Admission: route, check, persist, enqueue. Also the startup replay.

use std::collections::HashSet;

use anyhow::anyhow;

use super::state::AdmitMode;
use super::Scheduler;
use crate::error::{QueueError, Rejection};
use crate::queue::WaitingTask;
use crate::retry::{run_with_retry, ErrorKind, RetryPolicy};
use crate::task::{ResultMessage, TaskId, TaskRequest, TaskStatus};

impl Scheduler {
    /// Admit a new request. Returns its task id, or why it was not admitted.
    ///
    /// The database write happens outside the lock under a bounded wait;
    /// running out of time is reported as [`QueueError::Unavailable`].
    pub async fn add_task(&self, request: TaskRequest) -> Result<TaskId, QueueError> {
        self.admit(request, AdmitMode::New).await
    }

    async fn admit(&self, mut request: TaskRequest, mode: AdmitMode) -> Result<TaskId, QueueError> {
        if mode == AdmitMode::New {
            request.task_id = None;
        }
        request.validate()?;

        let group = {
            let mut state = self.inner.state.lock().await;
            match state.admit(&mut request, mode) {
                Ok(group) => group,
                Err(rejection) => {
                    tracing::debug!(
                        user_id = request.user_id,
                        site = %request.site,
                        "request rejected: {}",
                        rejection
                    );
                    return Err(rejection.into());
                }
            }
        };

        let request = match request.task_id {
            Some(_) => request,
            None => self.persist_request(&request).await?,
        };
        let task_id = request
            .task_id
            .ok_or_else(|| QueueError::Internal(anyhow!("persisted request has no id")))?;

        {
            let mut state = self.inner.state.lock().await;
            if let Err(rejection) = state.recheck(&group, &request, mode) {
                drop(state);
                tracing::debug!(task_id, "request rejected after persisting: {}", rejection);
                if mode == AdmitMode::New {
                    if let Err(e) = self.inner.db.delete_request(task_id).await {
                        tracing::warn!(task_id, "delete rejected request: {:#}", e);
                    }
                }
                return Err(rejection.into());
            }
            state
                .ledger
                .add_waiting(request.user_id, &request.site, &group);
            state.waiting.add_task(WaitingTask {
                task_id,
                group: group.clone(),
                request: request.clone(),
                queued_at: unix_secs(),
            });
        }
        self.inner.wake.notify_one();

        tracing::info!(
            task_id,
            user_id = request.user_id,
            site = %request.site,
            group = %group,
            proxy = %request.proxy,
            restored = mode == AdmitMode::Restore,
            "task queued"
        );
        Ok(task_id)
    }

    /// Save with a short retry, all bounded by the admission timeout.
    async fn persist_request(&self, request: &TaskRequest) -> Result<TaskRequest, QueueError> {
        let db = &self.inner.db;
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(200),
            ..RetryPolicy::default()
        };
        let save = run_with_retry(&policy, |_: &anyhow::Error| ErrorKind::Connection, || {
            db.save_request(request)
        });
        match tokio::time::timeout(self.inner.settings.admission_timeout, save).await {
            Ok(Ok(saved)) => Ok(saved),
            Ok(Err(e)) => {
                tracing::warn!("save request failed: {:#}", e);
                Err(QueueError::Unavailable(
                    "task database is unavailable, try later".to_string(),
                ))
            }
            Err(_) => {
                tracing::warn!("save request timed out");
                Err(QueueError::Unavailable(
                    "task database is overloaded, try later".to_string(),
                ))
            }
        }
    }

    /// Replay persisted requests through admission and re-deliver results
    /// that were never accepted by the notifier.
    pub(super) async fn restore(&self) -> anyhow::Result<()> {
        let results = self.inner.db.get_all_results().await?;
        let finished: HashSet<TaskId> = results.iter().map(|r| r.task_id).collect();

        let requests = self.inner.db.get_all_requests().await?;
        let mut restored = 0usize;
        for request in requests {
            let Some(task_id) = request.task_id else {
                continue;
            };
            if self.is_queued(task_id).await {
                continue;
            }
            if finished.contains(&task_id) {
                // Finished before the restart; only the cleanup was lost.
                if let Err(e) = self.inner.db.delete_request(task_id).await {
                    tracing::warn!(task_id, "delete finished request: {:#}", e);
                }
                continue;
            }
            match self.admit(request.clone(), AdmitMode::Restore).await {
                Ok(_) => restored += 1,
                Err(QueueError::Rejected(Rejection::Duplicate)) => {
                    tracing::debug!(task_id, "persisted request already queued");
                }
                Err(QueueError::Rejected(rejection)) => {
                    tracing::warn!(task_id, "persisted request no longer admissible: {}", rejection);
                    let result = ResultMessage::for_request(
                        task_id,
                        &request,
                        TaskStatus::Error,
                        rejection.to_string(),
                    );
                    self.finalize(result).await;
                }
                Err(e) => tracing::warn!(task_id, "restore request: {:#}", e),
            }
        }

        let pending = results.len();
        for result in results {
            let this = self.clone();
            tokio::spawn(async move { this.deliver(result).await });
        }
        tracing::info!(restored, pending_results = pending, "persisted work restored");
        Ok(())
    }

    /// Already waiting or running in this process, e.g. after a stop and start.
    async fn is_queued(&self, task_id: TaskId) -> bool {
        let state = self.inner.state.lock().await;
        state.waiting.contains(task_id) || state.running.contains(task_id)
    }
}

pub(super) fn unix_secs() -> i64 {
    super::unix_now() as i64
}
