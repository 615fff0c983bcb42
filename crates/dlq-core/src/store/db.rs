//! SQLite-backed task database implementation.
//!
//! Handles connection, migrations, and timestamp helpers. Row access lives in
//! `tasks` and `rates`.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::DatabaseConfig;

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the SQLite-backed task database.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/dlq/queue.db` on Debian.
#[derive(Clone)]
pub struct TaskDb {
    pub(crate) pool: Pool<Sqlite>,
}

impl TaskDb {
    /// Open the configured database, or the default one when no path is set.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        match &config.path {
            Some(path) => Self::open_at(path).await,
            None => Self::open_default().await,
        }
    }

    /// Open (or create) the default task database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("dlq")?;
        let db_path = xdg_dirs.get_state_home().join("queue.db");
        Self::open_at(&db_path).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await
            .with_context(|| format!("open task db: {}", path.display()))?;
        let db = TaskDb { pool };
        db.migrate().await?;
        tracing::debug!(path = %path.display(), "task db ready");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        // - `requests` holds admitted, unfinished requests as JSON; the row id is the task id.
        // - `results` holds finished results until the notifier accepts them.
        // - `rate_marks` holds per-counter launch marks with an expiry.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                site TEXT NOT NULL,
                request_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS results (
                task_id INTEGER PRIMARY KEY,
                result_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                site TEXT NOT NULL,
                url TEXT NOT NULL,
                format TEXT NOT NULL,
                status INTEGER NOT NULL,
                orig_size INTEGER NOT NULL DEFAULT 0,
                oper_size INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_marks (
                key TEXT PRIMARY KEY,
                marks_json TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix seconds (for DB timestamps).
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<TaskDb> {
    // Single connection to avoid in-memory pool handing back a different empty DB.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = TaskDb { pool };
    db.migrate().await?;
    Ok(db)
}
