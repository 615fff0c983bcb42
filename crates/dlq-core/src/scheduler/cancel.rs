//! Cancellation of waiting or running tasks.

use super::{unix_now, Scheduler};
use crate::task::{TaskId, TaskRequest};

impl Scheduler {
    /// Cancel a task wherever it is. A running worker is terminated and
    /// awaited. The persisted request row is always deleted. Returns the
    /// request, or `None` when the id is unknown.
    pub async fn cancel_task(&self, task_id: TaskId) -> Option<TaskRequest> {
        let (waiting, running) = {
            let mut state = self.inner.state.lock().await;
            match state.waiting.remove_task(task_id) {
                Some(task) => {
                    let req = &task.request;
                    state.ledger.remove_waiting(req.user_id, &req.site, &task.group);
                    (Some(task), None)
                }
                None => (None, state.running.remove_task(task_id)),
            }
        };

        let request = match (waiting, running) {
            (Some(task), _) => Some(task.request),
            (None, Some(task)) => {
                let grace = self.inner.settings.terminate_grace;
                if let Err(e) = task.handle.terminate(grace).await {
                    tracing::warn!(task_id, "terminate worker: {:#}", e);
                }
                let marks = {
                    let mut state = self.inner.state.lock().await;
                    let req = &task.request;
                    state
                        .ledger
                        .remove_run(req.user_id, &req.site, &task.group, &task.proxy, unix_now());
                    state.ledger.take_dirty_marks()
                };
                self.persist_dirty(marks).await;
                Some(task.request)
            }
            (None, None) => None,
        };

        if let Err(e) = self.inner.db.delete_request(task_id).await {
            tracing::warn!(task_id, "delete cancelled request: {:#}", e);
        }
        self.inner.wake.notify_one();
        match &request {
            Some(req) => tracing::info!(task_id, user_id = req.user_id, site = %req.site, "task cancelled"),
            None => tracing::debug!(task_id, "cancel: task not found"),
        }
        request
    }
}
