use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Concurrency, spacing and waiting ceilings shared by groups and sites. Zero means "no limit".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Ceiling on running tasks across every proxy and user.
    pub max_one_time: u32,
    /// Ceiling on running tasks per proxy bucket.
    pub one_time: u32,
    /// Ceiling on running tasks per proxy bucket for a single user.
    pub one_time_per_user: u32,
    /// Minimum seconds between two launches through the same proxy.
    pub delay: u64,
    /// Minimum seconds between two launches of one user through the same proxy.
    pub delay_per_user: u64,
    /// Ceiling on queued tasks across all users.
    pub max_waiting: u32,
    /// Ceiling on queued tasks (scoped).
    pub waiting: u32,
    /// Ceiling on queued tasks for a single user.
    pub waiting_per_user: u32,
}

/// A group of sites sharing one waiting queue and one set of limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    /// Output formats this group can produce.
    #[serde(default)]
    pub formats: Vec<String>,
    /// Downloader used when the site does not name one.
    #[serde(default)]
    pub downloader: Option<String>,
    #[serde(flatten)]
    pub limits: LimitConfig,
}

/// Per-site settings: routing, limits and worker launch parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Request parameters the site accepts (e.g. "auth", "images").
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Formats offered for this site; empty means "whatever its groups produce".
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub downloader: Option<String>,
    /// Fixed proxy applied when the request carries none.
    #[serde(default)]
    pub proxy: String,
    /// Take a proxy from the pool when the request carries none.
    #[serde(default)]
    pub proxy_required: bool,
    /// Groups this site may be routed to, in preference order.
    #[serde(default)]
    pub allowed_groups: Vec<String>,
    /// Output file naming pattern passed to the downloader.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Delay between page fetches inside the downloader, in seconds.
    #[serde(default)]
    pub page_delay: u64,
    #[serde(flatten)]
    pub limits: LimitConfig,
}

fn default_true() -> bool {
    true
}

/// Snapshot of everything the scheduler needs to route and limit tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Groups in scheduling order.
    pub groups: Vec<GroupConfig>,
    pub sites: Vec<SiteConfig>,
    /// Proxy pool for sites with `proxy_required`.
    pub proxies: Vec<String>,
    /// Bypass service address per proxy ("" = direct connection).
    pub bypass: BTreeMap<String, String>,
    /// Human-readable parameters per output format, reported by `check_site`.
    pub formats_params: BTreeMap<String, Vec<String>>,
}

impl QueueConfig {
    pub fn group(&self, name: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn site(&self, name: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.name == name)
    }

    /// Bypass service for a proxy, falling back to the direct entry.
    pub fn bypass_for(&self, proxy: &str) -> Option<&str> {
        self.bypass
            .get(proxy)
            .or_else(|| self.bypass.get(""))
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Reject duplicate names; unknown allowed groups are only logged.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for g in &self.groups {
            if !seen.insert(g.name.as_str()) {
                anyhow::bail!("duplicate group in queue config: {}", g.name);
            }
        }
        let mut seen_sites = HashSet::new();
        for s in &self.sites {
            if !seen_sites.insert(s.name.as_str()) {
                anyhow::bail!("duplicate site in queue config: {}", s.name);
            }
            for g in &s.allowed_groups {
                if !seen.contains(g.as_str()) {
                    tracing::warn!(site = %s.name, group = %g, "site allows unknown group");
                }
            }
        }
        Ok(())
    }
}

/// One external downloader binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Folder under `exec_folder` holding the binary; also its working directory.
    #[serde(default)]
    pub folder: PathBuf,
    /// Executable name inside `folder`.
    pub exec: String,
    /// Extra arguments appended after the generated ones.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Worker process settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker executable; None = the running `dlq` binary.
    pub program: Option<PathBuf>,
    /// Arguments for the worker executable; defaults to `["worker"]`.
    pub args: Vec<String>,
    pub save_folder: PathBuf,
    pub temp_folder: PathBuf,
    pub exec_folder: PathBuf,
    pub arch_folder: PathBuf,
    /// Largest single file a result may carry, in bytes.
    pub file_limit: u64,
    /// Downloader timeout passed through `--timeout`, in seconds.
    pub download_timeout_secs: u64,
    /// Naming pattern used when the site has none.
    pub pattern: String,
    /// Downloader used when neither site nor group names one.
    pub default_downloader: String,
    pub downloaders: BTreeMap<String, DownloaderConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: vec!["worker".to_string()],
            save_folder: PathBuf::from("/var/lib/dlq/save"),
            temp_folder: PathBuf::from("/var/lib/dlq/temp"),
            exec_folder: PathBuf::from("/opt/dlq/downloaders"),
            arch_folder: PathBuf::from("/var/lib/dlq/arch"),
            file_limit: 1_549_000_000,
            download_timeout_secs: 600,
            pattern: "{Book.Title}".to_string(),
            default_downloader: "elib2ebook".to_string(),
            downloaders: BTreeMap::new(),
        }
    }
}

/// Backoff shape between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 1.0,
            max_delay_secs: 30,
            backoff: Backoff::Fixed,
        }
    }
}

/// Where status and result notifications go.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Base URL; `download/status` and `download/done` are joined onto it.
    pub base_url: Option<String>,
    /// Per-request timeout in seconds (0 = curl default).
    pub timeout_secs: u64,
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Explicit SQLite path; None = `~/.local/state/dlq/queue.db`.
    pub path: Option<PathBuf>,
}

/// Global configuration loaded from `~/.config/dlq/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    /// Scheduling tick period in milliseconds.
    pub tick_interval_ms: u64,
    /// Period of the idle-user eviction and rate-mark flush, in seconds.
    pub flush_interval_secs: u64,
    /// Bound on the database write during admission, in seconds.
    pub admission_timeout_secs: u64,
    /// Expiry of persisted rate-limit marks, in seconds.
    pub rate_ttl_secs: u64,
    /// Time a worker gets to exit after SIGTERM before it is killed.
    pub terminate_grace_secs: u64,
    /// Replay persisted requests and undelivered results at startup.
    pub restore_tasks: bool,
    pub database: DatabaseConfig,
    pub notify: NotifyConfig,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            flush_interval_secs: 300,
            admission_timeout_secs: 5,
            rate_ttl_secs: 3600,
            terminate_grace_secs: 10,
            restore_tasks: true,
            database: DatabaseConfig::default(),
            notify: NotifyConfig::default(),
            worker: WorkerConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl DlqConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(10))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_secs(self.admission_timeout_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Parse and validate a config file.
pub fn load_from_path(path: &Path) -> Result<DlqConfig> {
    let data =
        fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
    let cfg: DlqConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    cfg.queue.validate()?;
    Ok(cfg)
}

/// Load configuration from `path`, creating a default file if none exists.
pub fn load_or_init_at(path: &Path) -> Result<DlqConfig> {
    if !path.exists() {
        let default_cfg = DlqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(path)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DlqConfig> {
    load_or_init_at(&config_path()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = DlqConfig::default();
        assert_eq!(cfg.tick_interval(), Duration::from_secs(1));
        assert_eq!(cfg.flush_interval(), Duration::from_secs(300));
        assert_eq!(cfg.admission_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.rate_ttl_secs, 3600);
        assert!(cfg.restore_tasks);
        assert_eq!(cfg.worker.args, vec!["worker".to_string()]);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = DlqConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: DlqConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn config_toml_groups_and_sites() {
        let toml = r#"
            tick_interval_ms = 500

            [queue]
            proxies = ["socks5://10.0.0.1:1080"]

            [queue.bypass]
            "" = "http://flare:8191"

            [queue.formats_params]
            fb2 = ["FB2", "book"]

            [[queue.groups]]
            name = "books"
            formats = ["fb2", "epub"]
            max_one_time = 4
            one_time_per_user = 1
            delay = 10

            [[queue.groups]]
            name = "audio"
            formats = ["mp3"]

            [[queue.sites]]
            name = "example.org"
            allowed_groups = ["books"]
            parameters = ["auth"]
            proxy_required = true
            max_waiting = 50
            delay_per_user = 30
        "#;
        let cfg: DlqConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.tick_interval_ms, 500);
        assert_eq!(cfg.flush_interval_secs, 300);

        let q = &cfg.queue;
        assert_eq!(q.groups.len(), 2);
        assert_eq!(q.groups[0].name, "books");
        assert_eq!(q.groups[0].limits.max_one_time, 4);
        assert_eq!(q.groups[0].limits.one_time_per_user, 1);
        assert_eq!(q.groups[0].limits.delay, 10);
        assert_eq!(q.groups[1].limits, LimitConfig::default());

        let site = q.site("example.org").unwrap();
        assert!(site.active);
        assert!(site.proxy_required);
        assert_eq!(site.limits.max_waiting, 50);
        assert_eq!(site.limits.delay_per_user, 30);
        assert_eq!(q.bypass_for("socks5://10.0.0.1:1080"), Some("http://flare:8191"));
        assert_eq!(q.formats_params["fb2"], vec!["FB2", "book"]);
        q.validate().unwrap();
    }

    #[test]
    fn duplicate_group_names_rejected() {
        let toml = r#"
            [[groups]]
            name = "a"
            [[groups]]
            name = "a"
        "#;
        let q: QueueConfig = toml::from_str(toml).unwrap();
        assert!(q.validate().is_err());
    }

    #[test]
    fn load_or_init_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = load_or_init_at(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg, DlqConfig::default());

        let again = load_from_path(&path).unwrap();
        assert_eq!(again, cfg);
    }
}
