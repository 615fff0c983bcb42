use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::*;
use crate::config::DownloaderConfig;
use crate::task::{TaskRequest, TaskStatus, WorkerMessage};
use crate::worker::WorkerContext;

fn job(root: &Path, exec: &str) -> WorkerJob {
    let mut request = TaskRequest::new(5, "example.org", "https://example.org/b/1");
    request.hashtags = Some("gf".to_string());
    WorkerJob {
        task_id: 42,
        request,
        context: WorkerContext {
            save_folder: root.join("save"),
            temp_folder: root.join("temp"),
            exec_folder: root.join("exec"),
            arch_folder: root.join("arch"),
            file_limit: 1_000_000,
            downloader: DownloaderConfig {
                folder: "dl".into(),
                exec: exec.to_string(),
                args: vec![],
            },
            proxy: String::new(),
            bypass: None,
            pattern: String::new(),
            page_delay: 0,
            timeout: 60,
        },
    }
}

#[cfg(unix)]
fn install_script(root: &Path, name: &str, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    let dir = root.join("exec").join("dl");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn recorder() -> (Emit, Arc<Mutex<Vec<WorkerMessage>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let emit: Emit = Arc::new(move |msg| sink.lock().unwrap().push(msg));
    (emit, seen)
}

const PARSE_SAVE: &str =
    r#"while [ $# -gt 0 ]; do case "$1" in --save) SAVE="$2"; shift;; esac; shift; done"#;

#[cfg(unix)]
#[tokio::test]
async fn successful_download_produces_caption_and_files() {
    let dir = tempfile::tempdir().unwrap();
    install_script(
        dir.path(),
        "fake",
        &format!(
            r#"{PARSE_SAVE}
echo "Загружена глава 1/1"
echo "Книга успешно сохранена"
printf 'book' > "$SAVE/book.fb2"
printf '{{"Title":"Road","Author":{{"Name":"Ann Writer"}},"Chapters":[{{"Title":"One","IsValid":true}}]}}' > "$SAVE/book.json"
printf 'x' > "$SAVE/notes.txt""#
        ),
    );
    let (emit, seen) = recorder();
    run_worker(job(dir.path(), "fake"), emit, std::future::pending())
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    let statuses: Vec<TaskStatus> = seen
        .iter()
        .filter_map(|m| match m {
            WorkerMessage::Status(s) => Some(s.status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses.first(), Some(&TaskStatus::Init));
    assert!(statuses.contains(&TaskStatus::Running));

    let result = match seen.last() {
        Some(WorkerMessage::Result(r)) => r,
        other => panic!("expected a result last, got {other:?}"),
    };
    assert_eq!(result.task_id, 42);
    assert_eq!(result.status, TaskStatus::Done);
    assert_eq!(result.files.len(), 1);
    assert!(result.files[0].ends_with("book.fb2"));
    assert_eq!(result.orig_size, 4);
    assert!(result.text.starts_with("Road\nAuthor: Ann Writer"));
    assert!(result.text.ends_with("#annwriter"));
    assert!(result.dbg_log.as_deref().unwrap_or("").contains("успешно"));
    assert!(!dir.path().join("save/42/notes.txt").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn banned_download_is_classified() {
    let dir = tempfile::tempdir().unwrap();
    install_script(
        dir.path(),
        "fake",
        "echo 'Загрузка завершена с ошибкой: Получен бан. Попробуйте позже'\nexit 1",
    );
    let (emit, seen) = recorder();
    run_worker(job(dir.path(), "fake"), emit, std::future::pending())
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    match seen.last() {
        Some(WorkerMessage::Result(r)) => {
            assert_eq!(r.status, TaskStatus::Error);
            assert_eq!(r.text, "An error occurred: got banned, try later");
            assert!(r.files.is_empty());
        }
        other => panic!("expected a result, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_downloader_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let (emit, seen) = recorder();
    run_worker(job(dir.path(), "does-not-exist"), emit, std::future::pending())
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    match seen.last() {
        Some(WorkerMessage::Result(r)) => {
            assert_eq!(r.status, TaskStatus::Error);
            assert!(r.text.contains("start downloader"));
        }
        other => panic!("expected a result, got {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_kills_downloader_without_result() {
    let dir = tempfile::tempdir().unwrap();
    install_script(dir.path(), "slow", "exec sleep 30");
    let (emit, seen) = recorder();
    run_worker(
        job(dir.path(), "slow"),
        emit,
        tokio::time::sleep(Duration::from_millis(300)),
    )
    .await
    .unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.iter().any(|m| matches!(m, WorkerMessage::Result(_))));
}

#[test]
fn reporter_skips_repeats_and_throttles_text() {
    let (emit, seen) = recorder();
    let req = TaskRequest::new(1, "example.org", "https://example.org/b/1");
    let mut r = StatusReporter::new(7, &req, emit).with_interval(Duration::from_secs(60));

    assert!(r.report(TaskStatus::Running, "chapter 1"));
    assert!(!r.report(TaskStatus::Running, "chapter 1"));
    // Text change inside the interval is held back.
    assert!(!r.report(TaskStatus::Running, "chapter 2"));
    // A status change always goes out.
    assert!(r.report(TaskStatus::Processing, "processing files"));
    assert_eq!(seen.lock().unwrap().len(), 2);

    let mut fast = StatusReporter::new(7, &req, recorder().0).with_interval(Duration::ZERO);
    assert!(fast.report(TaskStatus::Running, "a"));
    assert!(fast.report(TaskStatus::Running, "b"));
}

#[test]
fn file_at_the_limit_is_sent_whole() {
    let dir = tempfile::tempdir().unwrap();
    let mut job = job(dir.path(), "fake");
    job.context.file_limit = 10;
    let reporter = StatusReporter::new(job.task_id, &job.request, recorder().0);
    let mut item = WorkItem::new(job, reporter);

    let exact = dir.path().join("exact.fb2");
    let over = dir.path().join("over.fb2");
    fs::write(&exact, vec![1u8; 10]).unwrap();
    fs::write(&over, vec![1u8; 11]).unwrap();
    item.files = vec![exact.clone(), over];

    files::split_oversized(&mut item).unwrap();

    assert_eq!(item.result.files.len(), 3);
    assert_eq!(item.result.files[0], exact.display().to_string());
    assert!(item.result.files[1].ends_with("over.fb2.001"));
    assert!(item.result.files[2].ends_with("over.fb2.002"));
    assert!(exact.exists());
    assert!(!item.arch_dir.join("exact.fb2.001").exists());
    assert_eq!(item.result.orig_size, 21);
}
