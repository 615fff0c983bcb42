//! `dlq add <site> <url>` – queue a download.

use std::path::Path;

use anyhow::Result;
use dlq_core::control::ControlRequest;
use serde::Deserialize;

use super::{call, decode};
use crate::cli::AddArgs;

#[derive(Deserialize)]
struct Added {
    task_id: i64,
}

pub async fn run_add(socket: &Path, args: AddArgs) -> Result<()> {
    let request = args.into_request();
    let added: Added = decode(call(socket, ControlRequest::Add { request }).await?)?;
    println!("Added task {}", added.task_id);
    Ok(())
}
