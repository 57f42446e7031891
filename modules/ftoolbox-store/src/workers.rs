use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::WorkerRow;

const WORKER_COLUMNS: &str = "id, name, status, last_run_at, next_run_at, last_error, \
     run_count, success_count, failure_count, is_enabled, created_at, updated_at";

/// Make sure a registry row exists for this job name. New rows start idle
/// and enabled; existing rows are left untouched.
pub async fn ensure_worker(pool: &PgPool, name: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO workers (name, status, is_enabled)
        VALUES ($1, 'idle', TRUE)
        ON CONFLICT (name) DO NOTHING
        "#,
    )
    .bind(name)
    .execute(pool)
    .await
    .context("failed to ensure worker record")?;

    Ok(())
}

pub async fn fetch_worker(pool: &PgPool, name: &str) -> Result<Option<WorkerRow>> {
    let row = sqlx::query_as::<_, WorkerRow>(&format!(
        "SELECT {WORKER_COLUMNS} FROM workers WHERE name = $1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn all_workers(pool: &PgPool) -> Result<Vec<WorkerRow>> {
    let rows = sqlx::query_as::<_, WorkerRow>(&format!(
        "SELECT {WORKER_COLUMNS} FROM workers ORDER BY name"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Transition a worker into the running state at the start of an execution.
pub async fn mark_running(pool: &PgPool, name: &str, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "UPDATE workers SET status = 'running', last_run_at = $2, updated_at = $2 WHERE name = $1",
    )
    .bind(name)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Reset a worker to idle without advancing any counters; used when an
/// execution is cut short by shutdown rather than finishing.
pub async fn mark_idle(pool: &PgPool, name: &str, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE workers SET status = 'idle', updated_at = $2 WHERE name = $1")
        .bind(name)
        .bind(now)
        .execute(pool)
        .await?;

    Ok(())
}

/// Record the outcome of one execution: counters advance, status settles to
/// idle or failed, and the next tick time is stamped.
pub async fn finish_run(
    pool: &PgPool,
    name: &str,
    next_run_at: DateTime<Utc>,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE workers
        SET status = CASE WHEN $2::text IS NULL THEN 'idle' ELSE 'failed' END,
            run_count = run_count + 1,
            success_count = success_count + CASE WHEN $2::text IS NULL THEN 1 ELSE 0 END,
            failure_count = failure_count + CASE WHEN $2::text IS NULL THEN 0 ELSE 1 END,
            last_error = $2,
            next_run_at = $3,
            updated_at = now()
        WHERE name = $1
        "#,
    )
    .bind(name)
    .bind(error)
    .bind(next_run_at)
    .execute(pool)
    .await
    .context("failed to record worker run outcome")?;

    Ok(())
}
