use serde::{Deserialize, Serialize};

use super::request::{Route, TaskId, TaskRequest, UserId};

/// Numeric task status carried in worker messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum TaskStatus {
    Idle,
    Wait,
    Init,
    Running,
    Processing,
    Done,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn code(self) -> i32 {
        match self {
            TaskStatus::Idle => 0,
            TaskStatus::Wait => 1,
            TaskStatus::Init => 2,
            TaskStatus::Running => 3,
            TaskStatus::Processing => 4,
            TaskStatus::Done => 5,
            TaskStatus::Error => 98,
            TaskStatus::Cancelled => 99,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Wait => "wait",
            TaskStatus::Init => "init",
            TaskStatus::Running => "running",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl From<TaskStatus> for i32 {
    fn from(s: TaskStatus) -> i32 {
        s.code()
    }
}

impl TryFrom<i32> for TaskStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, String> {
        Ok(match code {
            0 => TaskStatus::Idle,
            1 => TaskStatus::Wait,
            2 => TaskStatus::Init,
            3 => TaskStatus::Running,
            4 => TaskStatus::Processing,
            5 => TaskStatus::Done,
            98 => TaskStatus::Error,
            99 => TaskStatus::Cancelled,
            other => return Err(format!("unknown task status code {other}")),
        })
    }
}

/// Progress update for a running task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub task_id: TaskId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub route: Route,
    pub text: String,
    pub status: TaskStatus,
}

impl StatusMessage {
    pub fn for_request(
        task_id: TaskId,
        request: &TaskRequest,
        status: TaskStatus,
        text: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            user_id: request.user_id,
            route: request.route.clone(),
            text: text.into(),
            status,
        }
    }
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub task_id: TaskId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub route: Route,
    pub site: String,
    #[serde(default)]
    pub proxy: String,
    pub url: String,
    pub format: String,
    #[serde(default)]
    pub start: u32,
    #[serde(default)]
    pub end: u32,
    pub status: TaskStatus,
    /// Caption on success, user-facing error text otherwise.
    pub text: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub orig_size: u64,
    #[serde(default)]
    pub oper_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbg_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbg_config: Option<String>,
}

impl ResultMessage {
    pub fn for_request(
        task_id: TaskId,
        request: &TaskRequest,
        status: TaskStatus,
        text: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            user_id: request.user_id,
            route: request.route.clone(),
            site: request.site.clone(),
            proxy: request.proxy.clone(),
            url: request.url.clone(),
            format: request.format.clone(),
            start: request.start,
            end: request.end,
            status,
            text: text.into(),
            cover: String::new(),
            files: Vec::new(),
            orig_size: 0,
            oper_size: 0,
            dbg_log: None,
            dbg_config: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Done
    }
}

/// One line on a worker's stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerMessage {
    Status(StatusMessage),
    Result(ResultMessage),
}
