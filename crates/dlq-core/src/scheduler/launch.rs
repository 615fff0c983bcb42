//! Build the worker job for a task about to launch.

use super::state::QueueState;
use crate::config::{DownloaderConfig, WorkerConfig};
use crate::queue::WaitingTask;
use crate::worker::{WorkerContext, WorkerJob};

impl QueueState {
    /// Downloader: site setting, then group setting, then the worker default.
    /// Names missing from the downloader table map to `<name>/<name>`.
    pub(super) fn resolve_downloader(&self, site: &str, group: &str, worker: &WorkerConfig) -> DownloaderConfig {
        let name = self
            .config
            .site(site)
            .and_then(|s| s.downloader.clone())
            .or_else(|| self.config.group(group).and_then(|g| g.downloader.clone()))
            .unwrap_or_else(|| worker.default_downloader.clone());
        match worker.downloaders.get(&name) {
            Some(d) => d.clone(),
            None => DownloaderConfig {
                folder: name.clone().into(),
                exec: name,
                args: Vec::new(),
            },
        }
    }

    pub(super) fn build_job(&self, task: &WaitingTask, worker: &WorkerConfig) -> WorkerJob {
        let request = &task.request;
        let site = self.config.site(&request.site);
        let pattern = site
            .and_then(|s| s.pattern.clone())
            .unwrap_or_else(|| worker.pattern.clone());
        let page_delay = site.map_or(0, |s| s.page_delay);

        WorkerJob {
            task_id: task.task_id,
            request: request.clone(),
            context: WorkerContext {
                save_folder: worker.save_folder.clone(),
                temp_folder: worker.temp_folder.clone(),
                exec_folder: worker.exec_folder.clone(),
                arch_folder: worker.arch_folder.clone(),
                file_limit: worker.file_limit,
                downloader: self.resolve_downloader(&request.site, &task.group, worker),
                proxy: request.proxy.clone(),
                bypass: self.config.bypass_for(&request.proxy).map(str::to_string),
                pattern,
                page_delay,
                timeout: worker.download_timeout_secs,
            },
        }
    }
}
