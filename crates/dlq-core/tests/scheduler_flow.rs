//! End-to-end scheduler flow through the public API, with an in-process
//! launcher standing in for worker processes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dlq_core::config::{DlqConfig, GroupConfig, LimitConfig, QueueConfig, SiteConfig};
use dlq_core::notify::Notifier;
use dlq_core::scheduler::Scheduler;
use dlq_core::store::TaskDb;
use dlq_core::task::{ResultMessage, StatusMessage, TaskRequest, TaskStatus};
use dlq_core::worker::{WorkerChannels, WorkerHandle, WorkerJob, WorkerLauncher};

/// Reports one status line, then finishes successfully after a short delay.
struct InstantLauncher;

impl WorkerLauncher for InstantLauncher {
    fn launch(&self, job: WorkerJob, channels: WorkerChannels) -> anyhow::Result<WorkerHandle> {
        tokio::spawn(async move {
            let _ = channels.status.send(StatusMessage::for_request(
                job.task_id,
                &job.request,
                TaskStatus::Running,
                "chapter 1 of 3",
            ));
            tokio::time::sleep(Duration::from_millis(30)).await;
            let mut result =
                ResultMessage::for_request(job.task_id, &job.request, TaskStatus::Done, "Title");
            result.files = vec!["book.fb2".to_string()];
            let _ = channels.results.send(result);
        });
        Ok(WorkerHandle::detached())
    }
}

#[derive(Default)]
struct Collect {
    results: Mutex<Vec<ResultMessage>>,
    statuses: Mutex<Vec<StatusMessage>>,
}

#[async_trait]
impl Notifier for Collect {
    async fn send_status(&self, status: &StatusMessage) -> bool {
        self.statuses.lock().unwrap().push(status.clone());
        true
    }

    async fn send_result(&self, result: &ResultMessage) -> bool {
        self.results.lock().unwrap().push(result.clone());
        true
    }
}

fn config() -> DlqConfig {
    let limits = LimitConfig {
        max_one_time: 1,
        ..LimitConfig::default()
    };
    DlqConfig {
        tick_interval_ms: 20,
        queue: QueueConfig {
            groups: vec![GroupConfig {
                name: "books".to_string(),
                formats: vec!["fb2".to_string()],
                downloader: None,
                limits,
            }],
            sites: vec![SiteConfig {
                name: "example.org".to_string(),
                active: true,
                parameters: Vec::new(),
                formats: Vec::new(),
                downloader: None,
                proxy: String::new(),
                proxy_required: false,
                allowed_groups: vec!["books".to_string()],
                pattern: None,
                page_delay: 0,
                limits: LimitConfig::default(),
            }],
            ..QueueConfig::default()
        },
        ..DlqConfig::default()
    }
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn tasks_run_one_at_a_time_and_are_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let db = TaskDb::open_at(dir.path().join("dlq.db")).await.unwrap();
    let notifier = Arc::new(Collect::default());
    let scheduler = Scheduler::new(&config(), db.clone(), notifier.clone(), Arc::new(InstantLauncher));
    scheduler.start().await.unwrap();

    let mut ids = Vec::new();
    for n in 0..3 {
        let req = TaskRequest::new(7, "example.org", format!("https://example.org/book/{n}"));
        ids.push(scheduler.add_task(req).await.unwrap());
    }
    let export = scheduler.export_queue().await;
    assert!(export.running.len() <= 1);

    wait_for(|| notifier.results.lock().unwrap().len() == 3).await;
    let mut delivered: Vec<i64> = notifier.results.lock().unwrap().iter().map(|r| r.task_id).collect();
    delivered.sort();
    assert_eq!(delivered, ids);

    let export = scheduler.export_queue().await;
    assert!(export.running.is_empty());
    assert!(export.waiting["books"].is_empty());
    assert!(db.get_all_requests().await.unwrap().is_empty());
    assert!(db.get_all_results().await.unwrap().is_empty());

    let stats = scheduler.site_stats().await.unwrap();
    assert_eq!(stats[0].site, "example.org");
    assert_eq!(stats[0].done, 3);

    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn queued_requests_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dlq.db");
    let notifier = Arc::new(Collect::default());

    let id = {
        let db = TaskDb::open_at(&path).await.unwrap();
        let scheduler = Scheduler::new(&config(), db, notifier.clone(), Arc::new(InstantLauncher));
        // Results and flush loops only; nothing is launched.
        scheduler.start_results().await;
        let req = TaskRequest::new(7, "example.org", "https://example.org/book/9");
        let id = scheduler.add_task(req).await.unwrap();
        scheduler.stop().await.unwrap();
        id
    };
    assert!(notifier.results.lock().unwrap().is_empty());

    let db = TaskDb::open_at(&path).await.unwrap();
    let scheduler = Scheduler::new(&config(), db, notifier.clone(), Arc::new(InstantLauncher));
    scheduler.start().await.unwrap();
    wait_for(|| notifier.results.lock().unwrap().len() == 1).await;
    assert_eq!(notifier.results.lock().unwrap()[0].task_id, id);
    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn cancel_through_public_api() {
    let dir = tempfile::tempdir().unwrap();
    let db = TaskDb::open_at(dir.path().join("dlq.db")).await.unwrap();
    let scheduler = Scheduler::new(&config(), db, Arc::new(Collect::default()), Arc::new(InstantLauncher));

    let req = TaskRequest::new(7, "example.org", "https://example.org/book/1");
    let id = scheduler.add_task(req).await.unwrap();
    let cancelled = scheduler.cancel_task(id).await.unwrap();
    assert_eq!(cancelled.user_id, 7);
    assert!(scheduler.export_queue().await.waiting["books"].is_empty());
    assert!(scheduler.cancel_task(id).await.is_none());
}
