//! Queued tasks, one ordered list per group.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::task::{TaskId, TaskRequest};

/// An admitted task waiting for capacity in its group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitingTask {
    pub task_id: TaskId,
    pub group: String,
    pub request: TaskRequest,
    /// Unix seconds at admission.
    pub queued_at: i64,
}

/// Waiting tasks keyed by group, each group in insertion order.
#[derive(Debug, Default)]
pub struct WaitingRegistry {
    groups: HashMap<String, Vec<WaitingTask>>,
    index: HashMap<TaskId, String>,
}

impl WaitingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_init(&mut self, group: &str) {
        self.groups.entry(group.to_string()).or_default();
    }

    /// Remove an empty group's list. Returns false while tasks are queued in it.
    pub fn group_destroy(&mut self, group: &str) -> bool {
        match self.groups.get(group) {
            Some(tasks) if !tasks.is_empty() => false,
            _ => {
                self.groups.remove(group);
                true
            }
        }
    }

    pub fn group_exists(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    pub fn groups(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    /// True when the group already holds a task that would produce the same download.
    pub fn check_duplicate(&self, group: &str, request: &TaskRequest) -> bool {
        self.groups
            .get(group)
            .is_some_and(|tasks| tasks.iter().any(|t| t.request.is_duplicate_of(request)))
    }

    /// Append to the group's list. Returns false if the id is already queued.
    pub fn add_task(&mut self, task: WaitingTask) -> bool {
        if self.index.contains_key(&task.task_id) {
            return false;
        }
        self.index.insert(task.task_id, task.group.clone());
        self.groups
            .entry(task.group.clone())
            .or_default()
            .push(task);
        true
    }

    pub fn remove_task(&mut self, task_id: TaskId) -> Option<WaitingTask> {
        let group = self.index.remove(&task_id)?;
        let tasks = self.groups.get_mut(&group)?;
        let pos = tasks.iter().position(|t| t.task_id == task_id)?;
        Some(tasks.remove(pos))
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.index.contains_key(&task_id)
    }

    pub fn get(&self, task_id: TaskId) -> Option<&WaitingTask> {
        let group = self.index.get(&task_id)?;
        self.groups.get(group)?.iter().find(|t| t.task_id == task_id)
    }

    /// Snapshot of a group's tasks in insertion order.
    pub fn get_tasks(&self, group: &str) -> Vec<WaitingTask> {
        self.groups.get(group).cloned().unwrap_or_default()
    }

    pub fn group_len(&self, group: &str) -> usize {
        self.groups.get(group).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn export(&self) -> BTreeMap<String, Vec<WaitingTask>> {
        self.groups
            .iter()
            .map(|(g, tasks)| {
                let tasks = tasks
                    .iter()
                    .map(|t| WaitingTask {
                        request: t.request.redacted(),
                        ..t.clone()
                    })
                    .collect();
                (g.clone(), tasks)
            })
            .collect()
    }
}
