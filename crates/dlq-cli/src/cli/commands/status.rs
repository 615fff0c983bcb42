//! `dlq status` – show counters, waiting and running tasks.

use std::path::Path;

use anyhow::Result;
use dlq_core::control::ControlRequest;
use serde_json::Value;

use super::call;

pub async fn run_status(socket: &Path, json: bool) -> Result<()> {
    let export = call(socket, ControlRequest::Export).await?.unwrap_or(Value::Null);
    if json {
        println!("{}", serde_json::to_string_pretty(&export)?);
        return Ok(());
    }
    print!("{}", render_status(&export));
    Ok(())
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Plain-text tables of running and waiting tasks.
pub(crate) fn render_status(export: &Value) -> String {
    let mut out = String::new();
    let running = export["running"].as_array().cloned().unwrap_or_default();
    if running.is_empty() {
        out.push_str("No running tasks.\n");
    } else {
        out.push_str(&format!(
            "{:<8} {:<8} {:<20} {:<20} {}\n",
            "ID", "USER", "SITE", "PROXY", "STATUS"
        ));
        for t in &running {
            let proxy = match t["proxy"].as_str() {
                Some("") | None => "direct".to_string(),
                Some(p) => p.to_string(),
            };
            out.push_str(&format!(
                "{:<8} {:<8} {:<20} {:<20} {}\n",
                text(&t["task_id"]),
                text(&t["user_id"]),
                text(&t["site"]),
                proxy,
                text(&t["status"])
            ));
        }
    }

    let waiting = export["waiting"].as_object().cloned().unwrap_or_default();
    for (group, tasks) in &waiting {
        let tasks = tasks.as_array().cloned().unwrap_or_default();
        if tasks.is_empty() {
            continue;
        }
        out.push_str(&format!("\nWaiting in {group} ({}):\n", tasks.len()));
        for t in &tasks {
            out.push_str(&format!(
                "{:<8} {:<8} {}\n",
                text(&t["task_id"]),
                text(&t["request"]["user_id"]),
                text(&t["request"]["url"])
            ));
        }
    }
    out
}
