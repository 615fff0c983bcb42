//! `dlq cancel <id>` – cancel a waiting or running task.

use std::path::Path;

use anyhow::Result;
use dlq_core::control::ControlRequest;
use dlq_core::task::TaskRequest;

use super::{call, decode};

pub async fn run_cancel(socket: &Path, id: i64) -> Result<()> {
    let request: TaskRequest = decode(call(socket, ControlRequest::Cancel { task_id: id }).await?)?;
    println!("Cancelled task {id} ({})", request.url);
    Ok(())
}
