//! Control socket round trip against a real scheduler.

use std::sync::Arc;

use dlq_core::config::{DlqConfig, GroupConfig, LimitConfig, QueueConfig, SiteConfig};
use dlq_core::control::ControlRequest;
use dlq_core::notify::NullNotifier;
use dlq_core::scheduler::Scheduler;
use dlq_core::store::TaskDb;
use dlq_core::task::TaskRequest;
use dlq_core::worker::ProcessLauncher;

use crate::cli::control_socket::{send_request, spawn_control_listener, ControlServer};

fn config() -> DlqConfig {
    DlqConfig {
        queue: QueueConfig {
            groups: vec![GroupConfig {
                name: "books".to_string(),
                formats: vec!["fb2".to_string()],
                downloader: None,
                limits: LimitConfig::default(),
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

#[tokio::test]
async fn add_export_cancel_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let db = TaskDb::open_at(dir.path().join("dlq.db")).await.unwrap();
    // No loops are started, so nothing is ever launched.
    let scheduler = Scheduler::new(
        &config(),
        db,
        Arc::new(NullNotifier),
        Arc::new(ProcessLauncher::new("true", Vec::new())),
    );
    let server = Arc::new(ControlServer::new(scheduler, dir.path().join("config.toml")));
    let socket = dir.path().join("control.sock");
    let listener = spawn_control_listener(server, &socket).unwrap();

    let request = TaskRequest::new(5, "example.org", "https://example.org/b/1");
    let added = send_request(&socket, &ControlRequest::Add { request: request.clone() })
        .await
        .unwrap();
    assert!(added.ok);
    let task_id = added.data.unwrap()["task_id"].as_i64().unwrap();

    let dup = send_request(&socket, &ControlRequest::Add { request }).await.unwrap();
    assert!(!dup.ok);
    assert!(!dup.retryable);

    let export = send_request(&socket, &ControlRequest::Export).await.unwrap();
    let waiting = &export.data.unwrap()["waiting"]["books"];
    assert_eq!(waiting[0]["task_id"].as_i64(), Some(task_id));

    let check = send_request(&socket, &ControlRequest::Check { site: "example.org".to_string() })
        .await
        .unwrap();
    assert_eq!(check.data.unwrap()["allowed"], true);

    let cancelled = send_request(&socket, &ControlRequest::Cancel { task_id }).await.unwrap();
    assert!(cancelled.ok);
    let again = send_request(&socket, &ControlRequest::Cancel { task_id }).await.unwrap();
    assert!(!again.ok);

    // The config file does not exist, so reload reports an error.
    let reload = send_request(&socket, &ControlRequest::Reload).await.unwrap();
    assert!(!reload.ok);

    listener.abort();
}

#[tokio::test]
async fn missing_server_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = send_request(&dir.path().join("none.sock"), &ControlRequest::Sites)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("dlq serve"));
}
