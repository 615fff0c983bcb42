//! The scheduling tick: promote waiting tasks to running workers.

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::admission::unix_secs;
use super::{unix_now, Scheduler};
use crate::queue::{RunningTask, WaitingTask, INITIAL_STATUS};
use crate::task::{ResultMessage, StatusMessage, TaskStatus};

impl Scheduler {
    pub(super) async fn tick_loop(self, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.inner.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("task loop started");
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = interval.tick() => {}
                _ = self.inner.wake.notified() => {}
            }
            self.tick().await;
        }
        tracing::info!("task loop stopped");
    }

    /// One pass over every group in configured order. Within a group tasks
    /// are tried in insertion order; a task that cannot start is skipped,
    /// not waited on.
    pub async fn tick(&self) {
        let now = unix_now();
        let mut launched: Vec<StatusMessage> = Vec::new();
        let mut failed: Vec<(WaitingTask, String)> = Vec::new();

        let marks = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;

            for group in state.group_order() {
                if state.waiting.group_len(&group) == 0 || !state.ledger.group_has_capacity(&group) {
                    continue;
                }
                for task in state.waiting.get_tasks(&group) {
                    let req = &task.request;
                    let proxy = req.proxy.as_str();
                    if !state.ledger.group_can_start(&group, proxy, now)
                        || !state.ledger.site_can_start(&req.site, proxy, now)
                        || !state
                            .ledger
                            .user_can_start(req.user_id, &req.site, &group, proxy, now)
                    {
                        continue;
                    }

                    state.waiting.remove_task(task.task_id);
                    state.ledger.remove_waiting(req.user_id, &req.site, &group);

                    if !state.router.still_routes(&req.site, &req.format, &group) {
                        tracing::warn!(task_id = task.task_id, group = %group, "route changed while waiting");
                        let text = format!("site {} no longer supports format {}", req.site, req.format);
                        failed.push((task, text));
                        continue;
                    }

                    let job = state.build_job(&task, &self.inner.settings.worker);
                    match self.inner.launcher.launch(job, self.inner.channels.clone()) {
                        Ok(handle) => {
                            state.ledger.add_run(req.user_id, &req.site, &group, proxy, now);
                            tracing::info!(
                                task_id = task.task_id,
                                group = %group,
                                site = %req.site,
                                proxy = %proxy,
                                pid = ?handle.pid(),
                                "task launched"
                            );
                            launched.push(StatusMessage::for_request(
                                task.task_id,
                                req,
                                TaskStatus::Init,
                                INITIAL_STATUS,
                            ));
                            let running = RunningTask::new(
                                task.task_id,
                                group.clone(),
                                proxy,
                                task.request.clone(),
                                unix_secs(),
                                handle,
                            );
                            state.running.add_task(running);
                        }
                        Err(e) => {
                            tracing::warn!(task_id = task.task_id, "launch failed: {:#}", e);
                            failed.push((task, "could not start the download, try later".to_string()));
                        }
                    }
                }
            }
            state.ledger.take_dirty_marks()
        };

        self.persist_dirty(marks).await;

        for status in launched {
            let this = self.clone();
            tokio::spawn(async move { this.inner.notifier.send_status(&status).await });
        }
        for (task, text) in failed {
            let result = ResultMessage::for_request(task.task_id, &task.request, TaskStatus::Error, text);
            self.finalize(result).await;
        }
    }
}
