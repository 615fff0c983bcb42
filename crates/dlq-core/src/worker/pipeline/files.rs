//! Folder setup and output-file handling around the download.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use super::WorkItem;
use crate::task::TaskStatus;

const COVER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}

fn stem(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("")
}

/// Start from an empty result folder; make sure temp exists.
pub(super) fn prepare_folders(item: &mut WorkItem) -> Result<()> {
    if item.result_dir.exists() {
        fs::remove_dir_all(&item.result_dir)
            .with_context(|| format!("clear {}", item.result_dir.display()))?;
    }
    for dir in [&item.result_dir, &item.temp_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    Ok(())
}

/// Keep files in the requested format, the metadata file and the cover;
/// delete everything else the downloader left behind.
pub(super) fn collect_files(item: &mut WorkItem) -> Result<()> {
    item.reporter.report(TaskStatus::Processing, "processing files");
    let format = item.job.request.format.clone();
    let mut trash = Vec::new();

    let mut entries: Vec<PathBuf> = fs::read_dir(&item.result_dir)
        .with_context(|| format!("list {}", item.result_dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in entries {
        let keep = if path.is_dir() {
            collect_audio(&path, &format, &mut item.files)?
        } else {
            let ext = extension(&path);
            if ext == "json" {
                item.metadata = Some(path.clone());
                true
            } else if ext == format {
                item.files.push(path.clone());
                true
            } else if COVER_EXTENSIONS.contains(&ext) && stem(&path).ends_with("_cover") {
                item.result.cover = path.display().to_string();
                true
            } else {
                false
            }
        };
        if !keep {
            trash.push(path);
        }
    }

    for path in trash {
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = removed {
            tracing::debug!(path = %path.display(), "could not remove leftover: {}", e);
        }
    }

    if item.files.is_empty() {
        bail!("downloader produced no {format} files");
    }
    Ok(())
}

/// Audio books land in `<book>/Audio/*.<format>`; samples are skipped.
fn collect_audio(dir: &Path, format: &str, out: &mut Vec<PathBuf>) -> Result<bool> {
    let audio = dir.join("Audio");
    if !audio.is_dir() {
        return Ok(false);
    }
    let mut found: Vec<PathBuf> = fs::read_dir(&audio)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && extension(p) == format && !stem(p).starts_with("sample"))
        .collect();
    found.sort();
    let any = !found.is_empty();
    out.extend(found);
    Ok(any)
}

/// Chapter-range suffix for partial downloads, e.g. `-from-3-to-9`.
pub(super) fn range_suffix(start: u32, end: u32, chapters_total: u32) -> Option<String> {
    if chapters_total == 0 {
        return None;
    }
    match (start, end) {
        (0, 0) => None,
        (s, 0) => Some(format!("-from-{s}-to-{}", s + chapters_total)),
        (0, _) => Some(format!("-from-1-to-{chapters_total}")),
        (s, e) => Some(format!("-from-{s}-to-{e}")),
    }
}

/// Name files after the book; partial downloads carry their chapter range.
pub(super) fn rename_files(item: &mut WorkItem) -> Result<()> {
    let req = &item.job.request;
    let many = item.files.len() > 1;
    let by_title = matches!(req.format.as_str(), "pdf" | "mp3") && !item.book.title.is_empty();
    let suffix = range_suffix(req.start, req.end, item.book.chapters_total);
    if !by_title && suffix.is_none() {
        return Ok(());
    }

    let mut renamed = Vec::with_capacity(item.files.len());
    for (i, path) in item.files.iter().enumerate() {
        let base = if by_title {
            if item.book.author.is_empty() {
                item.book.title.clone()
            } else {
                format!("{} - {}", item.book.author, item.book.title)
            }
        } else {
            format!("{}{}", stem(path), suffix.as_deref().unwrap_or(""))
        };
        let index = if many { format!(" ({})", i + 1) } else { String::new() };
        let name = sanitize_file_name(&format!("{base}{index}.{}", extension(path)));
        let target = path.with_file_name(name);
        fs::rename(path, &target)
            .with_context(|| format!("rename {} -> {}", path.display(), target.display()))?;
        renamed.push(target);
    }
    item.files = renamed;
    Ok(())
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}

/// Files up to the size limit are sent as-is; larger ones are cut into
/// numbered parts under the archive folder.
pub(super) fn split_oversized(item: &mut WorkItem) -> Result<()> {
    let limit = item.job.context.file_limit;
    for path in std::mem::take(&mut item.files) {
        let size = fs::metadata(&path)
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        item.result.orig_size += size;
        if limit == 0 || size <= limit {
            item.result.files.push(path.display().to_string());
            continue;
        }

        fs::create_dir_all(&item.arch_dir)
            .with_context(|| format!("create {}", item.arch_dir.display()))?;
        for part in split_file(&path, &item.arch_dir, limit)? {
            item.result.oper_size += fs::metadata(&part)?.len();
            item.result.files.push(part.display().to_string());
        }
        fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
    }
    Ok(())
}

/// Write `path` into `dir` as `<name>.001`, `<name>.002`, ... each at most `limit` bytes.
fn split_file(path: &Path, dir: &Path, limit: u64) -> Result<Vec<PathBuf>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("file name is not valid UTF-8")?;
    let mut input = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut parts = Vec::new();
    let mut buf = vec![0u8; 1 << 20];

    loop {
        let part_path = dir.join(format!("{name}.{:03}", parts.len() + 1));
        let mut written = 0u64;
        let mut out: Option<fs::File> = None;
        while written < limit {
            let want = (limit - written).min(buf.len() as u64) as usize;
            let n = input.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            if out.is_none() {
                out = Some(
                    fs::File::create(&part_path)
                        .with_context(|| format!("create {}", part_path.display()))?,
                );
            }
            if let Some(file) = out.as_mut() {
                file.write_all(&buf[..n])?;
            }
            written += n as u64;
        }
        if out.is_none() {
            break;
        }
        parts.push(part_path);
        if written < limit {
            break;
        }
    }
    Ok(parts)
}
