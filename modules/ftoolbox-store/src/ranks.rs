use anyhow::{Context, Result};
use sqlx::PgPool;

/// Recompute every tag's rank in one set-based statement. Ties share a rank
/// and the sequence has no gaps.
pub async fn recalculate_tag_ranks(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE tags
        SET rank = ranked.new_rank
        FROM (
            SELECT id, DENSE_RANK() OVER (ORDER BY view_count DESC, created_at ASC) AS new_rank
            FROM tags
        ) ranked
        WHERE tags.id = ranked.id
        "#,
    )
    .execute(pool)
    .await
    .context("failed to recalculate tag ranks")?;

    Ok(())
}

/// Recompute creator ranks over the live population; deleted creators lose
/// their rank entirely.
pub async fn recalculate_creator_ranks(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE creators
        SET rank = ranked.new_rank
        FROM (
            SELECT id, DENSE_RANK() OVER (ORDER BY followers DESC, created_at ASC) AS new_rank
            FROM creators
            WHERE is_deleted = FALSE
        ) ranked
        WHERE creators.id = ranked.id
        "#,
    )
    .execute(&mut *tx)
    .await
    .context("failed to recalculate creator ranks")?;

    sqlx::query("UPDATE creators SET rank = NULL WHERE is_deleted = TRUE")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Tags still missing a rank, used to decide the boot-time backfill.
pub async fn unranked_tag_count(pool: &PgPool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tags WHERE rank IS NULL")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn unranked_creator_count(pool: &PgPool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM creators WHERE rank IS NULL AND is_deleted = FALSE",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}
