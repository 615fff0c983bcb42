//! CLI for the DLQ download-job orchestrator.

mod commands;
mod control_socket;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use dlq_core::config;
use dlq_core::control::ControlRequest;
use dlq_core::logging;
use dlq_core::task::TaskRequest;

use commands::{
    run_add, run_cancel, run_check, run_completions, run_man, run_serve, run_simple, run_sites,
    run_stats, run_status, run_worker_process,
};

/// Top-level CLI for the DLQ download queue.
#[derive(Debug, Parser)]
#[command(name = "dlq")]
#[command(about = "DLQ: admission-controlled download job queue", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/dlq/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Control socket of the running server (default: ~/.local/state/dlq/control.sock).
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the scheduler and serve the control socket until SIGTERM or Ctrl+C.
    Serve,

    /// Run one job read from stdin (started by the server, not by hand).
    #[command(hide = true)]
    Worker,

    /// Queue a download.
    Add(AddArgs),

    /// Cancel a waiting or running task.
    Cancel {
        /// Task identifier.
        id: i64,
    },

    /// Show counters, waiting and running tasks.
    Status {
        /// Print the raw JSON export.
        #[arg(long)]
        json: bool,
    },

    /// Show whether a site accepts requests and in which formats.
    Check {
        site: String,
    },

    /// List active sites and those that accept credentials.
    Sites,

    /// Finished task counts per site.
    Stats,

    /// Re-read the config file and apply its queue section.
    Reload,

    /// Start or stop launching waiting tasks.
    Tasks {
        action: Toggle,
    },

    /// Start or stop processing worker results.
    Results {
        action: Toggle,
    },

    /// Print shell completions.
    Completions {
        shell: clap_complete::Shell,
    },

    /// Print the man page.
    Man,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    Start,
    Stop,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Site the URL belongs to, as named in the config.
    pub site: String,

    /// Book or page URL.
    pub url: String,

    /// Submitting user.
    #[arg(long, value_name = "ID")]
    pub user: i64,

    /// Output format.
    #[arg(long, default_value = "fb2")]
    pub format: String,

    /// First chapter to download (0 = from the beginning).
    #[arg(long, default_value_t = 0)]
    pub start: u32,

    /// Last chapter to download (0 = to the end).
    #[arg(long, default_value_t = 0)]
    pub end: u32,

    /// Keep images.
    #[arg(long)]
    pub images: bool,

    /// Download the cover.
    #[arg(long)]
    pub cover: bool,

    #[arg(long)]
    pub login: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    /// Proxy to use instead of the site's default.
    #[arg(long)]
    pub proxy: Option<String>,

    /// Chat to report progress to.
    #[arg(long)]
    pub chat_id: Option<i64>,

    /// Hashtag style for the caption.
    #[arg(long)]
    pub hashtags: Option<String>,
}

impl AddArgs {
    pub fn into_request(self) -> TaskRequest {
        let mut request = TaskRequest::new(self.user, self.site, self.url);
        request.format = self.format;
        request.start = self.start;
        request.end = self.end;
        request.images = self.images;
        request.cover = self.cover;
        request.login = self.login;
        request.password = self.password;
        request.proxy = self.proxy.unwrap_or_default();
        request.hashtags = self.hashtags;
        request.route.chat_id = self.chat_id;
        request
    }
}

impl CliCommand {
    pub fn init_logging(&self) {
        match self {
            CliCommand::Worker => logging::init_logging_stderr(),
            CliCommand::Completions { .. } | CliCommand::Man => {}
            _ => {
                if let Err(e) = logging::init_logging() {
                    logging::init_logging_stderr();
                    tracing::warn!("file logging unavailable, using stderr: {:#}", e);
                }
            }
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            CliCommand::Serve => {
                let config_path = match self.config {
                    Some(path) => path,
                    None => config::config_path()?,
                };
                let cfg = config::load_or_init_at(&config_path)?;
                tracing::debug!("loaded config: {:?}", cfg);
                let socket = socket_path(self.socket)?;
                run_serve(&cfg, &config_path, &socket).await?;
            }
            CliCommand::Worker => run_worker_process().await?,
            CliCommand::Completions { shell } => run_completions(shell),
            CliCommand::Man => run_man()?,
            command => run_client(command, &socket_path(self.socket)?).await?,
        }

        Ok(())
    }
}

fn socket_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => Ok(dlq_core::control::default_control_socket_path()?),
    }
}

/// Commands that talk to a running `dlq serve`.
async fn run_client(command: CliCommand, socket: &Path) -> Result<()> {
    match command {
        CliCommand::Add(args) => run_add(socket, args).await,
        CliCommand::Cancel { id } => run_cancel(socket, id).await,
        CliCommand::Status { json } => run_status(socket, json).await,
        CliCommand::Check { site } => run_check(socket, &site).await,
        CliCommand::Sites => run_sites(socket).await,
        CliCommand::Stats => run_stats(socket).await,
        CliCommand::Reload => run_simple(socket, ControlRequest::Reload, "Config reloaded").await,
        CliCommand::Tasks { action } => run_toggle(socket, action, true).await,
        CliCommand::Results { action } => run_toggle(socket, action, false).await,
        other => anyhow::bail!("{:?} is not a client command", other),
    }
}

async fn run_toggle(socket: &Path, action: Toggle, tasks: bool) -> Result<()> {
    let (request, message) = match (tasks, action) {
        (true, Toggle::Start) => (ControlRequest::StartTasks, "Task launching started"),
        (true, Toggle::Stop) => (ControlRequest::StopTasks, "Task launching stopped"),
        (false, Toggle::Start) => (ControlRequest::StartResults, "Result processing started"),
        (false, Toggle::Stop) => (ControlRequest::StopResults, "Result processing stopped"),
    };
    run_simple(socket, request, message).await
}

#[cfg(test)]
mod tests;
