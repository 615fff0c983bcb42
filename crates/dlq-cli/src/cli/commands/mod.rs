//! CLI command handlers. Each command is in its own file.

mod add;
mod cancel;
mod generate;
mod serve;
mod sites;
mod status;
mod worker;

use std::path::Path;

use anyhow::{Context, Result};
use dlq_core::control::ControlRequest;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cli::control_socket;

pub use add::run_add;
pub use cancel::run_cancel;
pub use generate::{run_completions, run_man};
pub use serve::run_serve;
pub use sites::{run_check, run_sites, run_stats};
pub use status::run_status;
pub use worker::run_worker_process;

/// Send `request` to the server; an error response becomes an error.
async fn call(socket: &Path, request: ControlRequest) -> Result<Option<Value>> {
    let response = control_socket::send_request(socket, &request).await?;
    if response.ok {
        return Ok(response.data);
    }
    let message = response
        .error
        .unwrap_or_else(|| "request failed".to_string());
    if response.retryable {
        anyhow::bail!("{message} (temporary, try again later)");
    }
    anyhow::bail!(message)
}

fn decode<T: DeserializeOwned>(data: Option<Value>) -> Result<T> {
    let data = data.context("server sent no data")?;
    serde_json::from_value(data).context("unexpected response from server")
}

/// Requests without a payload: print `message` on success.
pub async fn run_simple(socket: &Path, request: ControlRequest, message: &str) -> Result<()> {
    call(socket, request).await?;
    println!("{message}");
    Ok(())
}
