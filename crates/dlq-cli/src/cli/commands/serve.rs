//! `dlq serve` – run the scheduler until SIGTERM or Ctrl+C.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use dlq_core::config::DlqConfig;
use dlq_core::notify::{HttpNotifier, Notifier, NullNotifier};
use dlq_core::scheduler::Scheduler;
use dlq_core::store::TaskDb;
use dlq_core::worker::ProcessLauncher;

use crate::cli::control_socket::{self, ControlServer};

pub async fn run_serve(cfg: &DlqConfig, config_path: &Path, socket_path: &Path) -> Result<()> {
    let db = TaskDb::open(&cfg.database).await?;
    let notifier: Arc<dyn Notifier> = match HttpNotifier::from_config(&cfg.notify)? {
        Some(http) => Arc::new(http),
        None => {
            tracing::warn!("notify.base_url not set; results stay in the database");
            Arc::new(NullNotifier)
        }
    };
    let launcher = Arc::new(ProcessLauncher::from_config(&cfg.worker)?);

    let scheduler = Scheduler::new(cfg, db, notifier, launcher);
    scheduler.start().await?;

    let server = Arc::new(ControlServer::new(scheduler.clone(), config_path.to_path_buf()));
    let listener = control_socket::spawn_control_listener(Arc::clone(&server), socket_path)?;
    tracing::info!(socket = %socket_path.display(), "control socket listening");
    println!("dlq serving on {}", socket_path.display());

    wait_for_shutdown(&server).await?;

    listener.abort();
    scheduler.stop().await?;
    if let Err(e) = std::fs::remove_file(socket_path) {
        tracing::debug!("remove control socket: {}", e);
    }
    tracing::info!("dlq stopped");
    Ok(())
}

/// Block until SIGINT or SIGTERM. SIGHUP reloads the config.
#[cfg(unix)]
async fn wait_for_shutdown(server: &ControlServer) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = sighup.recv() => {
                tracing::info!("SIGHUP received, reloading config");
                if let Err(e) = server.reload().await {
                    tracing::warn!("reload failed: {:#}", e);
                }
            }
            _ = sigint.recv() => {
                tracing::info!("SIGINT received");
                return Ok(());
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received");
                return Ok(());
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_server: &ControlServer) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
