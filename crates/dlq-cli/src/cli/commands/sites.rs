//! `dlq check`, `dlq sites`, `dlq stats` – site information.

use std::path::Path;

use anyhow::Result;
use dlq_core::control::ControlRequest;
use dlq_core::scheduler::{SiteCheck, SiteLists};
use serde_json::Value;

use super::{call, decode};

pub async fn run_check(socket: &Path, site: &str) -> Result<()> {
    let check: SiteCheck = decode(
        call(
            socket,
            ControlRequest::Check {
                site: site.to_string(),
            },
        )
        .await?,
    )?;
    if !check.allowed {
        println!("{site}: not accepted");
        return Ok(());
    }
    println!("{site}: accepted");
    if !check.parameters.is_empty() {
        println!("  parameters: {}", check.parameters.join(", "));
    }
    for (format, params) in &check.formats {
        if params.is_empty() {
            println!("  {format}");
        } else {
            println!("  {format}: {}", params.join(", "));
        }
    }
    Ok(())
}

pub async fn run_sites(socket: &Path) -> Result<()> {
    let lists: SiteLists = decode(call(socket, ControlRequest::Sites).await?)?;
    if lists.active.is_empty() {
        println!("No active sites.");
        return Ok(());
    }
    for site in &lists.active {
        let auth = if lists.auth.contains(site) { " (login)" } else { "" };
        println!("{site}{auth}");
    }
    Ok(())
}

pub async fn run_stats(socket: &Path) -> Result<()> {
    let stats = call(socket, ControlRequest::Stats).await?.unwrap_or(Value::Null);
    let rows = stats.as_array().cloned().unwrap_or_default();
    if rows.is_empty() {
        println!("No finished tasks.");
        return Ok(());
    }
    println!("{:<30} {:>8} {:>8}", "SITE", "DONE", "FAILED");
    for row in rows {
        println!(
            "{:<30} {:>8} {:>8}",
            row["site"].as_str().unwrap_or("-"),
            row["done"].as_i64().unwrap_or(0),
            row["failed"].as_i64().unwrap_or(0)
        );
    }
    Ok(())
}
