//! Ownership of one worker process.

use std::process::ExitStatus;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Child;

/// Exclusive handle on a worker process. Dropping it does not kill the
/// process; call [`WorkerHandle::terminate`] or [`WorkerHandle::reap`].
#[derive(Debug)]
pub struct WorkerHandle {
    child: Option<Child>,
    pid: Option<u32>,
}

impl WorkerHandle {
    pub fn from_child(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Some(child),
            pid,
        }
    }

    /// Handle with no process behind it (tests, in-process launchers).
    pub fn detached() -> Self {
        Self {
            child: None,
            pid: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the worker to stop, wait up to `grace`, then kill it. Returns the
    /// exit status, or None for a detached handle.
    pub async fn terminate(mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };
        if let Some(status) = child.try_wait().context("poll worker")? {
            return Ok(Some(status));
        }
        send_sigterm(self.pid, &mut child);
        wait_or_kill(child, grace, self.pid).await.map(Some)
    }

    /// Wait for a worker that already reported its result to exit on its own.
    /// Falls back to [`WorkerHandle::terminate`] after `grace`.
    pub async fn reap(mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        let waited = match self.child.as_mut() {
            Some(child) => tokio::time::timeout(grace, child.wait()).await,
            None => return Ok(None),
        };
        match waited {
            Ok(status) => Ok(Some(status.context("wait for worker")?)),
            Err(_) => {
                tracing::debug!(pid = ?self.pid, "worker still alive after result; terminating");
                self.terminate(grace).await
            }
        }
    }
}

async fn wait_or_kill(mut child: Child, grace: Duration, pid: Option<u32>) -> Result<ExitStatus> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.context("wait for worker"),
        Err(_) => {
            tracing::warn!(pid = ?pid, "worker ignored SIGTERM; killing");
            child.start_kill().context("kill worker")?;
            child.wait().await.context("wait for killed worker")
        }
    }
}

/// SIGTERM to the worker's process group, so its downloader gets it too.
#[cfg(unix)]
fn send_sigterm(pid: Option<u32>, child: &mut Child) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        let _ = child.start_kill();
        return;
    };
    let rc = unsafe { libc::kill(-pid, libc::SIGTERM) };
    if rc != 0 {
        // Not a group leader (custom launcher); signal the process alone.
        let _ = unsafe { libc::kill(pid, libc::SIGTERM) };
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: Option<u32>, child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detached_handle_is_noop() {
        let h = WorkerHandle::detached();
        assert!(h.pid().is_none());
        assert!(h.terminate(Duration::from_millis(10)).await.unwrap().is_none());
        assert!(WorkerHandle::detached()
            .reap(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn terminate_stops_sleeping_process() {
        let mut cmd = tokio::process::Command::new("sleep");
        cmd.arg("30").process_group(0);
        let child = cmd.spawn().unwrap();
        let h = WorkerHandle::from_child(child);
        assert!(h.pid().is_some());
        let status = h.terminate(Duration::from_secs(5)).await.unwrap().unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn reap_collects_exited_process() {
        let child = tokio::process::Command::new("true").spawn().unwrap();
        let status = WorkerHandle::from_child(child)
            .reap(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(status.success());
    }
}
