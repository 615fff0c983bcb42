//! In-flight tasks and the worker processes that own them.

use std::collections::HashMap;

use serde::Serialize;

use crate::task::{TaskId, TaskRequest, UserId};
use crate::worker::WorkerHandle;

/// Status text shown until the worker reports progress.
pub const INITIAL_STATUS: &str = "waiting to start";

#[derive(Debug)]
pub struct RunningTask {
    pub task_id: TaskId,
    pub group: String,
    /// Proxy bucket the launch was counted against.
    pub proxy: String,
    pub request: TaskRequest,
    /// Last status text reported by the worker.
    pub status: String,
    /// Unix seconds at launch.
    pub started_at: i64,
    pub handle: WorkerHandle,
}

impl RunningTask {
    pub fn new(
        task_id: TaskId,
        group: impl Into<String>,
        proxy: impl Into<String>,
        request: TaskRequest,
        started_at: i64,
        handle: WorkerHandle,
    ) -> Self {
        Self {
            task_id,
            group: group.into(),
            proxy: proxy.into(),
            request,
            status: INITIAL_STATUS.to_string(),
            started_at,
            handle,
        }
    }

    pub fn view(&self) -> RunningView {
        RunningView {
            task_id: self.task_id,
            user_id: self.request.user_id,
            site: self.request.site.clone(),
            group: self.group.clone(),
            proxy: self.proxy.clone(),
            url: self.request.url.clone(),
            format: self.request.format.clone(),
            status: self.status.clone(),
            started_at: self.started_at,
            pid: self.handle.pid(),
        }
    }
}

/// Exported view of a running task (no process handle, no credentials).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningView {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub site: String,
    pub group: String,
    pub proxy: String,
    pub url: String,
    pub format: String,
    pub status: String,
    pub started_at: i64,
    pub pid: Option<u32>,
}

/// Running tasks by id.
///
/// `remove_task` detaches the entry; the caller then terminates its handle
/// with [`WorkerHandle::terminate`] outside the scheduler lock and awaits exit.
#[derive(Debug, Default)]
pub struct RunningRegistry {
    tasks: HashMap<TaskId, RunningTask>,
}

impl RunningRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_duplicate(&self, request: &TaskRequest) -> bool {
        self.tasks
            .values()
            .any(|t| t.request.is_duplicate_of(request))
    }

    /// Register a launched task. Returns false if the id is already running.
    pub fn add_task(&mut self, task: RunningTask) -> bool {
        if self.tasks.contains_key(&task.task_id) {
            return false;
        }
        self.tasks.insert(task.task_id, task);
        true
    }

    pub fn remove_task(&mut self, task_id: TaskId) -> Option<RunningTask> {
        self.tasks.remove(&task_id)
    }

    /// No-op when the task already left the registry.
    pub fn update_status(&mut self, task_id: TaskId, text: &str) {
        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.status = text.to_string();
        }
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.tasks.contains_key(&task_id)
    }

    pub fn get(&self, task_id: TaskId) -> Option<&RunningTask> {
        self.tasks.get(&task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Detach every task (shutdown).
    pub fn drain(&mut self) -> Vec<RunningTask> {
        self.tasks.drain().map(|(_, t)| t).collect()
    }

    /// Views sorted by task id.
    pub fn export(&self) -> Vec<RunningView> {
        let mut views: Vec<RunningView> = self.tasks.values().map(RunningTask::view).collect();
        views.sort_by_key(|v| v.task_id);
        views
    }
}
