//! Rate-limit marks with per-key expiry.

use anyhow::Result;
use sqlx::Row;

use super::db::{unix_timestamp, TaskDb};
use crate::stats::{decode_marks, encode_marks, RateMarks, RateSnapshot};

/// Key/value store for launch marks, sharing the task database's pool.
#[derive(Clone)]
pub struct RateStore {
    db: TaskDb,
    ttl_secs: i64,
}

impl RateStore {
    pub fn new(db: TaskDb, ttl_secs: u64) -> Self {
        Self {
            db,
            ttl_secs: ttl_secs as i64,
        }
    }

    /// Write (or refresh) one key; it expires `ttl_secs` from now.
    pub async fn put(&self, key: &str, marks: &RateMarks) -> Result<()> {
        let json = encode_marks(marks)?;
        sqlx::query(
            r#"
            INSERT INTO rate_marks (key, marks_json, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                marks_json = excluded.marks_json,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(json)
        .bind(unix_timestamp() + self.ttl_secs)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    /// Write several keys in one transaction.
    pub async fn put_all(&self, entries: &[(String, RateMarks)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let expires_at = unix_timestamp() + self.ttl_secs;
        let mut tx = self.db.pool.begin().await?;
        for (key, marks) in entries {
            sqlx::query(
                r#"
                INSERT INTO rate_marks (key, marks_json, expires_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    marks_json = excluded.marks_json,
                    expires_at = excluded.expires_at
                "#,
            )
            .bind(key)
            .bind(encode_marks(marks)?)
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Every unexpired entry.
    pub async fn load_all(&self) -> Result<RateSnapshot> {
        let rows = sqlx::query("SELECT key, marks_json FROM rate_marks WHERE expires_at > ?1")
            .bind(unix_timestamp())
            .fetch_all(&self.db.pool)
            .await?;

        let mut snapshot = RateSnapshot::new();
        for row in rows {
            let key: String = row.get("key");
            let json: String = row.get("marks_json");
            match decode_marks(&json) {
                Ok(marks) => snapshot.insert(&key, marks),
                Err(e) => tracing::warn!(key = %key, "skipping unreadable rate marks: {:#}", e),
            }
        }
        Ok(snapshot)
    }

    /// Delete expired entries; returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let done = sqlx::query("DELETE FROM rate_marks WHERE expires_at <= ?1")
            .bind(unix_timestamp())
            .execute(&self.db.pool)
            .await?;
        Ok(done.rows_affected())
    }
}
