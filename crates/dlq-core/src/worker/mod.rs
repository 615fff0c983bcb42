//! Worker processes: the job contract, the launcher used by the scheduler,
//! and the pipeline that runs inside the worker process itself.
//!
//! The scheduler hands a [`WorkerJob`] to a [`WorkerLauncher`] and gets back a
//! [`WorkerHandle`] it owns until the task leaves the running registry. Status
//! and result messages come back on the [`WorkerChannels`].

mod classify;
mod handle;
pub mod pipeline;
mod process;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::DownloaderConfig;
use crate::task::{ResultMessage, StatusMessage, TaskId, TaskRequest};

pub use classify::{classify_failure, escape_error_text, FailureKind};
pub use handle::WorkerHandle;
pub use pipeline::run_worker;
pub use process::ProcessLauncher;

/// Everything the worker needs besides the request, resolved at launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerContext {
    pub save_folder: PathBuf,
    pub temp_folder: PathBuf,
    pub exec_folder: PathBuf,
    pub arch_folder: PathBuf,
    pub file_limit: u64,
    pub downloader: DownloaderConfig,
    /// Proxy the launch was counted against ("" = direct).
    pub proxy: String,
    /// Bypass service for that proxy, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass: Option<String>,
    pub pattern: String,
    /// Seconds between page fetches (0 = downloader default).
    #[serde(default)]
    pub page_delay: u64,
    /// Downloader timeout in seconds.
    pub timeout: u64,
}

/// One line on the worker's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerJob {
    pub task_id: TaskId,
    pub request: TaskRequest,
    pub context: WorkerContext,
}

/// Where a launched worker's messages are forwarded.
#[derive(Debug, Clone)]
pub struct WorkerChannels {
    pub status: mpsc::UnboundedSender<StatusMessage>,
    pub results: mpsc::UnboundedSender<ResultMessage>,
}

/// Starts isolated workers. Must be called from within a tokio runtime.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, job: WorkerJob, channels: WorkerChannels) -> anyhow::Result<WorkerHandle>;
}
