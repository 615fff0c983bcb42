//! Request, result and history rows.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::Row;

use super::db::{unix_timestamp, TaskDb};
use crate::task::{ResultMessage, TaskId, TaskRequest, TaskStatus};

/// Finished-task counts for one site, from the history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteStat {
    pub site: String,
    pub done: i64,
    pub failed: i64,
}

impl TaskDb {
    /// Persist a request. New requests get a fresh id; requests that already
    /// carry one (restored at startup) keep it.
    pub async fn save_request(&self, request: &TaskRequest) -> Result<TaskRequest> {
        let mut stored = request.clone();
        stored.task_id = None;
        let json = serde_json::to_string(&stored).context("serialize request")?;
        let now = unix_timestamp();

        let id = match request.task_id {
            Some(id) => {
                sqlx::query(
                    r#"
                    INSERT INTO requests (id, user_id, site, request_json, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(id) DO UPDATE SET request_json = excluded.request_json
                    "#,
                )
                .bind(id)
                .bind(request.user_id)
                .bind(&request.site)
                .bind(&json)
                .bind(now)
                .execute(&self.pool)
                .await?;
                id
            }
            None => sqlx::query(
                r#"
                INSERT INTO requests (user_id, site, request_json, created_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(request.user_id)
            .bind(&request.site)
            .bind(&json)
            .bind(now)
            .execute(&self.pool)
            .await?
            .last_insert_rowid(),
        };

        stored.task_id = Some(id);
        Ok(stored)
    }

    /// All unfinished requests, oldest first. Rows that no longer parse are skipped.
    pub async fn get_all_requests(&self) -> Result<Vec<TaskRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT id, request_json
            FROM requests
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let json: String = row.get("request_json");
            match serde_json::from_str::<TaskRequest>(&json) {
                Ok(mut req) => {
                    req.task_id = Some(id);
                    out.push(req);
                }
                Err(e) => tracing::warn!(task_id = id, "skipping unreadable request row: {}", e),
            }
        }
        Ok(out)
    }

    pub async fn delete_request(&self, task_id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM requests WHERE id = ?1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store (or replace) the result awaiting delivery.
    pub async fn save_result(&self, result: &ResultMessage) -> Result<()> {
        let json = serde_json::to_string(result).context("serialize result")?;
        sqlx::query(
            r#"
            INSERT INTO results (task_id, result_json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(task_id) DO UPDATE SET
                result_json = excluded.result_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(result.task_id)
        .bind(json)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Results not yet delivered, oldest task first.
    pub async fn get_all_results(&self) -> Result<Vec<ResultMessage>> {
        let rows = sqlx::query("SELECT task_id, result_json FROM results ORDER BY task_id ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("task_id");
            let json: String = row.get("result_json");
            match serde_json::from_str::<ResultMessage>(&json) {
                Ok(result) => out.push(result),
                Err(e) => tracing::warn!(task_id = id, "skipping unreadable result row: {}", e),
            }
        }
        Ok(out)
    }

    pub async fn delete_result(&self, task_id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM results WHERE task_id = ?1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append a finished task to the history.
    pub async fn add_history(&self, result: &ResultMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO history (
                task_id, user_id, site, url, format,
                status, orig_size, oper_size, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(result.task_id)
        .bind(result.user_id)
        .bind(&result.site)
        .bind(&result.url)
        .bind(&result.format)
        .bind(result.status.code())
        .bind(result.orig_size as i64)
        .bind(result.oper_size as i64)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Done and failed counts per site, busiest first.
    pub async fn site_stats(&self) -> Result<Vec<SiteStat>> {
        let rows = sqlx::query(
            r#"
            SELECT site,
                   SUM(CASE WHEN status = ?1 THEN 1 ELSE 0 END) AS done,
                   SUM(CASE WHEN status = ?2 THEN 1 ELSE 0 END) AS failed
            FROM history
            GROUP BY site
            ORDER BY COUNT(*) DESC, site ASC
            "#,
        )
        .bind(TaskStatus::Done.code())
        .bind(TaskStatus::Error.code())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SiteStat {
                site: row.get("site"),
                done: row.get("done"),
                failed: row.get("failed"),
            })
            .collect())
    }
}
