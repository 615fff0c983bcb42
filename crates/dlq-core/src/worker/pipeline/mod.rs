//! The worker-side processing pipeline.
//!
//! A job runs as an ordered list of stage functions over one [`WorkItem`].
//! The first failing stage ends the run; its error is classified into
//! user-facing text and the result goes out with status Error. A shutdown
//! signal kills the downloader and ends the run without a result.

mod caption;
mod download;
mod files;
mod reporter;

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use super::{classify_failure, WorkerJob};
use crate::task::{ResultMessage, TaskStatus, WorkerMessage};

pub use caption::BookInfo;
pub use download::{downloader_args, downloader_path, progress_text};
pub use reporter::StatusReporter;

/// Callback receiving every message the worker produces, in order.
pub type Emit = Arc<dyn Fn(WorkerMessage) + Send + Sync>;

/// One processing step.
pub type Stage = fn(&mut WorkItem) -> Result<()>;

/// Stages in execution order.
pub const STAGES: &[(&str, Stage)] = &[
    ("prepare_folders", files::prepare_folders),
    ("run_downloader", download::run_downloader),
    ("collect_files", files::collect_files),
    ("read_metadata", caption::read_metadata),
    ("rename_files", files::rename_files),
    ("split_oversized", files::split_oversized),
    ("build_caption", caption::build_caption),
];

/// Mutable state threaded through the stages.
pub struct WorkItem {
    pub job: WorkerJob,
    /// Where the downloader writes: `save_folder/<task_id>`.
    pub result_dir: PathBuf,
    /// Downloader scratch space: `temp_folder/<task_id>`.
    pub temp_dir: PathBuf,
    /// Parts of oversized files: `arch_folder/<task_id>`.
    pub arch_dir: PathBuf,
    /// Collected downloader output.
    pub dbg_log: String,
    /// Output files found after the download, before size handling.
    pub files: Vec<PathBuf>,
    /// Metadata file written by the downloader, if any.
    pub metadata: Option<PathBuf>,
    pub book: BookInfo,
    pub result: ResultMessage,
    pub reporter: StatusReporter,
    /// Pid of the running downloader (0 = none).
    pub downloader_pid: Arc<AtomicU32>,
}

impl WorkItem {
    pub fn new(job: WorkerJob, reporter: StatusReporter) -> Self {
        let id = job.task_id.to_string();
        let result_dir = job.context.save_folder.join(&id);
        let temp_dir = job.context.temp_folder.join(&id);
        let arch_dir = job.context.arch_folder.join(&id);
        let mut result =
            ResultMessage::for_request(job.task_id, &job.request, TaskStatus::Init, String::new());
        result.proxy = job.context.proxy.clone();
        Self {
            job,
            result_dir,
            temp_dir,
            arch_dir,
            dbg_log: String::new(),
            files: Vec::new(),
            metadata: None,
            book: BookInfo::default(),
            result,
            reporter,
            downloader_pid: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Run every stage and return the final result.
    pub fn run(mut self) -> ResultMessage {
        self.reporter.report(TaskStatus::Init, "preparing download");
        for (name, stage) in STAGES {
            if let Err(e) = stage(&mut self) {
                tracing::warn!(task_id = self.job.task_id, stage = *name, "stage failed: {:#}", e);
                return self.into_failure(&e);
            }
        }
        self.result.status = TaskStatus::Done;
        self.attach_debug();
        self.result
    }

    fn into_failure(mut self, err: &anyhow::Error) -> ResultMessage {
        self.result.status = TaskStatus::Error;
        self.result.text = classify_failure(&self.dbg_log, &format!("{err:#}"));
        self.result.cover.clear();
        self.result.files.clear();
        self.attach_debug();
        self.result
    }

    fn attach_debug(&mut self) {
        let config = serde_json::json!({
            "request": self.job.request.redacted(),
            "context": self.job.context,
        });
        self.result.dbg_config = serde_json::to_string_pretty(&config).ok();
        self.result.dbg_log = Some(std::mem::take(&mut self.dbg_log));
    }
}

/// Run `job` to completion, emitting status messages and one result. When
/// `shutdown` resolves first, the downloader is killed and no result is sent.
pub async fn run_worker<S>(job: WorkerJob, emit: Emit, shutdown: S) -> Result<()>
where
    S: Future<Output = ()>,
{
    let task_id = job.task_id;
    let reporter = StatusReporter::new(task_id, &job.request, emit.clone());
    let item = WorkItem::new(job, reporter);
    let pid = item.downloader_pid.clone();

    let run = tokio::task::spawn_blocking(move || item.run());
    tokio::pin!(shutdown);

    tokio::select! {
        joined = run => {
            let result = joined.context("worker pipeline panicked")?;
            tracing::info!(task_id, status = result.status.as_str(), "worker finished");
            emit(WorkerMessage::Result(result));
            Ok(())
        }
        _ = &mut shutdown => {
            kill_downloader(pid.load(Ordering::SeqCst));
            tracing::info!(task_id, "worker cancelled");
            Ok(())
        }
    }
}

#[cfg(unix)]
fn kill_downloader(pid: u32) {
    if let Ok(pid) = i32::try_from(pid) {
        if pid > 0 {
            unsafe {
                libc::kill(pid, libc::SIGKILL);
            }
        }
    }
}

#[cfg(not(unix))]
fn kill_downloader(_pid: u32) {}

#[cfg(test)]
mod tests;
