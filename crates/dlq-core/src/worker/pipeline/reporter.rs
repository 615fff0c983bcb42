//! Throttled status reporting from inside a worker.

use std::time::{Duration, Instant};

use super::Emit;
use crate::task::{StatusMessage, TaskId, TaskRequest, TaskStatus, WorkerMessage};

/// Minimum spacing between two progress texts within the same status.
const MIN_INTERVAL: Duration = Duration::from_secs(5);

/// Emits status messages only when they change. Text-only changes are
/// spaced by at least [`MIN_INTERVAL`]; a status change is sent at once.
pub struct StatusReporter {
    template: StatusMessage,
    emit: Emit,
    interval: Duration,
    last: Option<(TaskStatus, String)>,
    last_sent: Option<Instant>,
}

impl StatusReporter {
    pub fn new(task_id: TaskId, request: &TaskRequest, emit: Emit) -> Self {
        Self {
            template: StatusMessage::for_request(task_id, request, TaskStatus::Idle, ""),
            emit,
            interval: MIN_INTERVAL,
            last: None,
            last_sent: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns true when a message was emitted.
    pub fn report(&mut self, status: TaskStatus, text: &str) -> bool {
        let same_status = match &self.last {
            Some((s, t)) if *s == status && t == text => return false,
            Some((s, _)) => *s == status,
            None => false,
        };
        if same_status
            && self
                .last_sent
                .is_some_and(|at| at.elapsed() < self.interval)
        {
            return false;
        }

        let mut msg = self.template.clone();
        msg.status = status;
        msg.text = text.to_string();
        (self.emit)(WorkerMessage::Status(msg));
        self.last = Some((status, text.to_string()));
        self.last_sent = Some(Instant::now());
        true
    }
}
