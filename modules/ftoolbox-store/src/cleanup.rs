use anyhow::{Context, Result};
use sqlx::PgPool;

pub async fn count_low_signal_tags(pool: &PgPool, min_views: i64) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tags WHERE view_count < $1")
        .bind(min_views)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Remove tags below the view floor together with their history and any
/// co-occurrence edges touching them, all-or-nothing. Returns tags removed.
pub async fn delete_low_signal_tags(pool: &PgPool, min_views: i64) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM tag_history WHERE tag_id IN (SELECT id FROM tags WHERE view_count < $1)",
    )
    .bind(min_views)
    .execute(&mut *tx)
    .await
    .context("failed to delete tag history")?;

    sqlx::query(
        r#"
        DELETE FROM tag_relations_daily
        WHERE tag_id IN (SELECT id FROM tags WHERE view_count < $1)
           OR related_tag_id IN (SELECT id FROM tags WHERE view_count < $1)
        "#,
    )
    .bind(min_views)
    .execute(&mut *tx)
    .await
    .context("failed to delete tag relations")?;

    let result = sqlx::query("DELETE FROM tags WHERE view_count < $1")
        .bind(min_views)
        .execute(&mut *tx)
        .await
        .context("failed to delete tags")?;

    tx.commit().await?;
    Ok(result.rows_affected())
}
