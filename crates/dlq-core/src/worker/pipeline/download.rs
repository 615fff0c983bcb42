//! Run the external downloader and turn its output into progress updates.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::Ordering;

use anyhow::{bail, Context, Result};

use super::WorkItem;
use crate::task::{TaskRequest, TaskStatus};
use crate::worker::WorkerContext;

/// Full path of the downloader binary: `exec_folder/folder/exec`.
pub fn downloader_path(ctx: &WorkerContext) -> PathBuf {
    ctx.exec_folder
        .join(&ctx.downloader.folder)
        .join(&ctx.downloader.exec)
}

/// Command line for one download. Audio is requested as an additional file
/// next to the metadata; everything else as `<format>,json_lite`.
pub fn downloader_args(
    req: &TaskRequest,
    ctx: &WorkerContext,
    result_dir: &Path,
    temp_dir: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--save".into(),
        result_dir.display().to_string(),
        "--temp".into(),
        temp_dir.display().to_string(),
        "--timeout".into(),
        ctx.timeout.to_string(),
        "--url".into(),
        req.url.clone(),
        "--format".into(),
    ];

    let audio = req.format == "mp3";
    if audio {
        args.extend(["json_lite", "--additional", "--additional-types", "audio"].map(String::from));
    } else {
        args.push(format!("{},json_lite", req.format));
    }

    if req.cover {
        args.push("--cover".into());
    }
    if !req.images || audio {
        args.push("--no-image".into());
    }
    if req.start != 0 {
        args.extend(["--start".to_string(), req.start.to_string()]);
    }
    if req.end != 0 {
        args.extend(["--end".to_string(), req.end.to_string()]);
    }
    if let (Some(login), Some(password)) = (&req.login, &req.password) {
        args.extend([
            "--login".to_string(),
            login.clone(),
            "--password".to_string(),
            password.clone(),
        ]);
    }
    if !ctx.pattern.is_empty() {
        args.extend(["--book-name-pattern".to_string(), ctx.pattern.clone()]);
    }
    if !ctx.proxy.is_empty() {
        args.extend(["--proxy".to_string(), ctx.proxy.clone()]);
    }
    if let Some(bypass) = &ctx.bypass {
        args.extend(["--flare".to_string(), bypass.clone()]);
    }
    if ctx.page_delay > 0 {
        args.extend(["--delay".to_string(), ctx.page_delay.to_string()]);
    }
    args.extend(ctx.downloader.args.iter().cloned());
    args
}

/// Status text for one downloader output line; None hides the line.
pub fn progress_text(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("Жду ") || line.starts_with("Загружена картинка") {
        return None;
    }
    if line.starts_with("Начинаю сохранение книги") || line.contains("успешно сохранена") {
        return Some("saving files".to_string());
    }
    if line.contains("Дополнительный файл доступен") {
        return Some("fetching additional file".to_string());
    }
    Some(line.to_string())
}

pub(super) fn run_downloader(item: &mut WorkItem) -> Result<()> {
    let ctx = &item.job.context;
    if ctx.downloader.exec.is_empty() {
        bail!("no downloader configured for {}", item.job.request.site);
    }
    let program = downloader_path(ctx);
    let args = downloader_args(&item.job.request, ctx, &item.result_dir, &item.temp_dir);
    tracing::debug!(task_id = item.job.task_id, program = %program.display(), "starting downloader");

    let mut child = Command::new(&program)
        .args(&args)
        .current_dir(ctx.exec_folder.join(&ctx.downloader.folder))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("start downloader {}", program.display()))?;
    item.downloader_pid.store(child.id(), Ordering::SeqCst);

    let stdout = child.stdout.take().context("downloader stdout not captured")?;
    let mut stderr = child.stderr.take().context("downloader stderr not captured")?;
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf);
        buf
    });

    item.reporter.report(TaskStatus::Running, "downloading");
    let mut reader = BufReader::new(stdout);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        let n = reader
            .read_until(b'\n', &mut raw)
            .context("read downloader output")?;
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&raw);
        item.dbg_log.push_str(&line);
        if let Some(text) = progress_text(&line) {
            item.reporter.report(TaskStatus::Running, &text);
        }
    }

    let status = child.wait().context("wait for downloader")?;
    item.downloader_pid.store(0, Ordering::SeqCst);
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        if stderr.trim().is_empty() {
            bail!("download process exited unexpectedly ({status})");
        }
        bail!("{}", stderr.trim());
    }
    let produced = std::fs::read_dir(&item.result_dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if !produced {
        if stderr.trim().is_empty() {
            bail!("downloader produced no files");
        }
        bail!("{}", stderr.trim());
    }
    Ok(())
}
