//! Launch workers as child processes speaking JSON lines.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdout, Command};

use super::{WorkerChannels, WorkerHandle, WorkerJob, WorkerLauncher};
use crate::config::WorkerConfig;
use crate::task::{ResultMessage, TaskStatus, WorkerMessage};

/// Text of the result synthesized when a worker's stdout closes without one.
pub const NO_RESULT_TEXT: &str = "worker exited without a result";

/// Spawns `program args...` per task in its own process group.
///
/// The job goes to stdin as one JSON line; each stdout line is a
/// [`WorkerMessage`]. Worker stderr is inherited so its logs land next to ours.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Configured program, or the running executable when none is set.
    pub fn from_config(cfg: &WorkerConfig) -> Result<Self> {
        let program = match &cfg.program {
            Some(p) => p.clone(),
            None => std::env::current_exe().context("locate current executable")?,
        };
        Ok(Self::new(program, cfg.args.clone()))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, job: WorkerJob, channels: WorkerChannels) -> Result<WorkerHandle> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn worker: {}", self.program.display()))?;
        let mut stdin = child.stdin.take().context("worker stdin not captured")?;
        let stdout = child.stdout.take().context("worker stdout not captured")?;

        let mut line = serde_json::to_vec(&job).context("serialize worker job")?;
        line.push(b'\n');
        let task_id = job.task_id;
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&line).await {
                tracing::warn!(task_id, "failed to hand job to worker: {}", e);
            }
            // Dropping stdin closes it; the worker reads exactly one line.
        });

        tokio::spawn(forward_messages(job, stdout, channels));

        let handle = WorkerHandle::from_child(child);
        tracing::debug!(task_id, pid = ?handle.pid(), "worker spawned");
        Ok(handle)
    }
}

/// Route stdout lines to the channels until EOF. Exactly one result is sent.
async fn forward_messages(job: WorkerJob, stdout: ChildStdout, channels: WorkerChannels) {
    let mut lines = BufReader::new(stdout).lines();
    let mut got_result = false;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(task_id = job.task_id, "reading worker output failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WorkerMessage>(&line) {
            Ok(WorkerMessage::Status(mut status)) => {
                status.task_id = job.task_id;
                let _ = channels.status.send(status);
            }
            Ok(WorkerMessage::Result(mut result)) => {
                if got_result {
                    tracing::warn!(task_id = job.task_id, "worker sent a second result; ignored");
                    continue;
                }
                result.task_id = job.task_id;
                got_result = true;
                let _ = channels.results.send(result);
            }
            Err(e) => {
                tracing::debug!(task_id = job.task_id, "unparsable worker line: {}", e);
            }
        }
    }

    if !got_result {
        let result =
            ResultMessage::for_request(job.task_id, &job.request, TaskStatus::Error, NO_RESULT_TEXT);
        let _ = channels.results.send(result);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::DownloaderConfig;
    use crate::task::TaskRequest;
    use crate::worker::WorkerContext;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn job(task_id: i64) -> WorkerJob {
        WorkerJob {
            task_id,
            request: TaskRequest::new(3, "example.org", "https://example.org/b/1"),
            context: WorkerContext {
                save_folder: "/tmp/save".into(),
                temp_folder: "/tmp/temp".into(),
                exec_folder: "/tmp/exec".into(),
                arch_folder: "/tmp/arch".into(),
                file_limit: 1_000,
                downloader: DownloaderConfig::default(),
                proxy: String::new(),
                bypass: None,
                pattern: "{Book.Title}".to_string(),
                page_delay: 0,
                timeout: 60,
            },
        }
    }

    fn channels() -> (
        WorkerChannels,
        mpsc::UnboundedReceiver<crate::task::StatusMessage>,
        mpsc::UnboundedReceiver<ResultMessage>,
    ) {
        let (status, status_rx) = mpsc::unbounded_channel();
        let (results, results_rx) = mpsc::unbounded_channel();
        (WorkerChannels { status, results }, status_rx, results_rx)
    }

    #[tokio::test]
    async fn silent_worker_yields_error_result() {
        let launcher = ProcessLauncher::new("true", vec![]);
        let (ch, _status_rx, mut results_rx) = channels();
        let handle = launcher.launch(job(9), ch).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), results_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.task_id, 9);
        assert_eq!(result.status, TaskStatus::Error);
        assert_eq!(result.text, NO_RESULT_TEXT);
        handle.reap(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn worker_lines_are_routed() {
        let script = concat!(
            "read job; ",
            r#"echo '{"kind":"status","task_id":0,"user_id":3,"text":"chapter 1","status":3}'; "#,
            "echo 'not json'; ",
            r#"echo '{"kind":"result","task_id":0,"user_id":3,"site":"example.org","url":"https://example.org/b/1","format":"fb2","status":5,"text":"Title"}'"#,
        );
        let launcher = ProcessLauncher::new("sh", vec!["-c".to_string(), script.to_string()]);
        let (ch, mut status_rx, mut results_rx) = channels();
        let handle = launcher.launch(job(4), ch).unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), status_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.task_id, 4);
        assert_eq!(status.text, "chapter 1");

        let result = tokio::time::timeout(Duration::from_secs(5), results_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.task_id, 4);
        assert!(result.is_success());

        handle.reap(Duration::from_secs(5)).await.unwrap();
        // Channel closes after the one result; nothing synthesized.
        assert!(results_rx.recv().await.is_none());
    }
}
