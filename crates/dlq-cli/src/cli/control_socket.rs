//! Control socket: server (during `dlq serve`) and client (every other command).
//! Protocol: one JSON request per line, one JSON response per line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use dlq_core::config;
use dlq_core::control::{ControlRequest, ControlResponse};
use dlq_core::scheduler::Scheduler;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Answers control requests against a running scheduler.
pub struct ControlServer {
    scheduler: Scheduler,
    config_path: PathBuf,
}

impl ControlServer {
    pub fn new(scheduler: Scheduler, config_path: PathBuf) -> Self {
        Self {
            scheduler,
            config_path,
        }
    }

    pub async fn dispatch(&self, request: ControlRequest) -> ControlResponse {
        let s = &self.scheduler;
        match request {
            ControlRequest::Add { request } => match s.add_task(request).await {
                Ok(task_id) => ControlResponse::ok(json!({ "task_id": task_id })),
                Err(e) => e.into(),
            },
            ControlRequest::Cancel { task_id } => match s.cancel_task(task_id).await {
                Some(request) => ControlResponse::ok(request.redacted()),
                None => ControlResponse::error(format!("task {task_id} not found")),
            },
            ControlRequest::Export => ControlResponse::ok(s.export_queue().await),
            ControlRequest::Check { site } => ControlResponse::ok(s.check_site(&site).await),
            ControlRequest::Sites => ControlResponse::ok(s.sites().await),
            ControlRequest::Stats => match s.site_stats().await {
                Ok(stats) => ControlResponse::ok(stats),
                Err(e) => ControlResponse::error(format!("{e:#}")),
            },
            ControlRequest::Reload => match self.reload().await {
                Ok(()) => ControlResponse::empty(),
                Err(e) => ControlResponse::error(format!("{e:#}")),
            },
            ControlRequest::StartTasks => {
                s.start_tasks().await;
                ControlResponse::empty()
            }
            ControlRequest::StopTasks => {
                s.stop_tasks().await;
                ControlResponse::empty()
            }
            ControlRequest::StartResults => {
                s.start_results().await;
                ControlResponse::empty()
            }
            ControlRequest::StopResults => {
                s.stop_results().await;
                ControlResponse::empty()
            }
        }
    }

    /// Re-read the config file and apply its queue section.
    pub async fn reload(&self) -> Result<()> {
        let cfg = config::load_from_path(&self.config_path)?;
        self.scheduler.update_config(cfg.queue).await?;
        tracing::info!(path = %self.config_path.display(), "config reloaded");
        Ok(())
    }

    async fn handle(&self, stream: UnixStream) -> Result<()> {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<ControlRequest>(line) {
                Ok(request) => self.dispatch(request).await,
                Err(e) => ControlResponse::error(format!("bad request: {e}")),
            };
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            write.write_all(out.as_bytes()).await?;
        }
        Ok(())
    }
}

/// Bind `path` (replacing a stale socket) and serve each connection on its
/// own task.
pub fn spawn_control_listener(
    server: Arc<ControlServer>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create socket dir: {}", parent.display()))?;
    }
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("remove stale socket: {}", path.display()))?;
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("bind control socket: {}", path.display()))?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let server = Arc::clone(&server);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle(stream).await {
                            tracing::debug!("control connection: {:#}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Send one request and wait for its response.
pub async fn send_request(socket_path: &Path, request: &ControlRequest) -> Result<ControlResponse> {
    let stream = UnixStream::connect(socket_path).await.with_context(|| {
        format!(
            "connect to {} (is `dlq serve` running?)",
            socket_path.display()
        )
    })?;
    let (read, mut write) = stream.into_split();
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    write.write_all(line.as_bytes()).await?;
    write.shutdown().await?;

    let mut lines = BufReader::new(read).lines();
    let reply = lines
        .next_line()
        .await?
        .context("control socket closed without a response")?;
    serde_json::from_str(&reply).context("parse control response")
}
