//! The single `run_status` row (id = 1). Every transition is one conditional
//! UPDATE so concurrent writers cannot interleave a read and a write.

use sqlx::SqlitePool;

use crate::config::RUN_MESSAGE_MAX_CHARS;
use crate::db::models::RunStatusRow;
use crate::error::Result;
use crate::types::{RunPhase, RunStatus, RunStatusCode};

fn clip(message: &str) -> String {
    message.chars().take(RUN_MESSAGE_MAX_CHARS).collect()
}

impl RunStatusRow {
    /// Unknown phase or code strings degrade to `idle` / no code.
    pub fn into_status(self) -> RunStatus {
        RunStatus {
            phase: self.phase.parse().unwrap_or(RunPhase::Idle),
            started_epoch: self.started_epoch,
            finished_epoch: self.finished_epoch,
            status_code: self.status_code.as_deref().and_then(|c| c.parse().ok()),
            message: self.message,
            ok_count: self.ok_count,
            err_count: self.err_count,
        }
    }
}

pub async fn read(pool: &SqlitePool) -> Result<RunStatus> {
    let row = sqlx::query_as::<_, RunStatusRow>(
        r#"
        SELECT phase, started_epoch, finished_epoch, status_code, message, ok_count, err_count
        FROM run_status
        WHERE id = 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(RunStatusRow::into_status).unwrap_or(RunStatus {
        phase: RunPhase::Idle,
        started_epoch: None,
        finished_epoch: None,
        status_code: None,
        message: None,
        ok_count: 0,
        err_count: 0,
    }))
}

/// Enter `running` with zeroed counters. Refuses (returns false) when a run
/// is already recorded as running.
pub async fn set_running(pool: &SqlitePool, started_epoch: i64, message: &str) -> Result<bool> {
    let res = sqlx::query(
        r#"
        INSERT INTO run_status (id, phase, started_epoch, finished_epoch, status_code, message, ok_count, err_count)
        VALUES (1, 'running', ?, NULL, NULL, ?, 0, 0)
        ON CONFLICT(id) DO UPDATE SET
            phase = 'running',
            started_epoch = excluded.started_epoch,
            finished_epoch = NULL,
            status_code = NULL,
            message = excluded.message,
            ok_count = 0,
            err_count = 0
        WHERE run_status.phase <> 'running'
        "#,
    )
    .bind(started_epoch)
    .bind(clip(message))
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Normal completion of the run that started at `started_epoch`. A no-op
/// when the record has since been recovered or taken by another run.
pub async fn finish_if_current(
    pool: &SqlitePool,
    started_epoch: i64,
    finished_epoch: i64,
    code: RunStatusCode,
    message: &str,
    ok_count: i64,
    err_count: i64,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        UPDATE run_status
        SET phase = 'finished', finished_epoch = ?, status_code = ?, message = ?,
            ok_count = ?, err_count = ?
        WHERE id = 1 AND phase = 'running' AND started_epoch = ?
        "#,
    )
    .bind(finished_epoch)
    .bind(code.as_str())
    .bind(clip(message))
    .bind(ok_count)
    .bind(err_count)
    .bind(started_epoch)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Force-finish a running record. With `started_before = Some(t)` only a run
/// that started strictly before `t` is touched. Counters are preserved.
pub async fn force_finish_running(
    pool: &SqlitePool,
    started_before: Option<i64>,
    finished_epoch: i64,
    code: RunStatusCode,
    message: &str,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        UPDATE run_status
        SET phase = 'finished', finished_epoch = ?, status_code = ?, message = ?
        WHERE id = 1 AND phase = 'running'
          AND (? IS NULL OR COALESCE(started_epoch, 0) < ?)
        "#,
    )
    .bind(finished_epoch)
    .bind(code.as_str())
    .bind(clip(message))
    .bind(started_before)
    .bind(started_before)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Unconditional finish used by the manual reset.
pub async fn force_finish(
    pool: &SqlitePool,
    finished_epoch: i64,
    code: RunStatusCode,
    message: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE run_status
        SET phase = 'finished', finished_epoch = ?, status_code = ?, message = ?
        WHERE id = 1
        "#,
    )
    .bind(finished_epoch)
    .bind(code.as_str())
    .bind(clip(message))
    .execute(pool)
    .await?;
    Ok(())
}
