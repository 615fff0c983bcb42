//! `dlq worker` – run one job in an isolated process.
//!
//! Reads a single job line from stdin and writes status lines and one result
//! line to stdout. SIGTERM stops the downloader and exits without a result.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use dlq_core::task::WorkerMessage;
use dlq_core::worker::pipeline::Emit;
use dlq_core::worker::{run_worker, WorkerJob};
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run_worker_process() -> Result<()> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("read job from stdin")?;
    let job: WorkerJob = serde_json::from_str(line.trim()).context("parse job")?;
    tracing::info!(task_id = job.task_id, site = %job.request.site, "worker started");

    let emit: Emit = Arc::new(|message: WorkerMessage| match serde_json::to_string(&message) {
        Ok(line) => {
            let mut out = std::io::stdout().lock();
            if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
                tracing::warn!("write message: {}", e);
            }
        }
        Err(e) => tracing::warn!("encode message: {}", e),
    });

    run_worker(job, emit, terminated()).await
}

/// Resolves on SIGTERM or Ctrl+C.
async fn terminated() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
                return;
            }
            Err(e) => tracing::warn!("install SIGTERM handler: {}", e),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}
