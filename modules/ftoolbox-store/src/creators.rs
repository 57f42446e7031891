use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::models::{Creator, CreatorHistory, CreatorMetrics};
use crate::tags::STALENESS_HOURS;

const CREATOR_COLUMNS: &str = "id, username, display_name, media_likes, post_likes, followers, \
     image_count, video_count, rank, last_checked_at, is_deleted, deleted_detected_at, created_at, updated_at";

/// Creators due for a refresh, most-followed first.
pub async fn stale_creators(pool: &PgPool, limit: i64) -> Result<Vec<Creator>> {
    let cutoff = Utc::now() - Duration::hours(STALENESS_HOURS);
    let rows = sqlx::query_as::<_, Creator>(&format!(
        r#"
        SELECT {CREATOR_COLUMNS}
        FROM creators
        WHERE last_checked_at IS NULL OR last_checked_at < $1
        ORDER BY followers DESC
        LIMIT $2
        "#
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch stale creators")?;

    Ok(rows)
}

pub async fn find_by_id(pool: &PgPool, creator_id: &str) -> Result<Option<Creator>> {
    let row = sqlx::query_as::<_, Creator>(&format!(
        "SELECT {CREATOR_COLUMNS} FROM creators WHERE id = $1"
    ))
    .bind(creator_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Touch `last_checked_at` for a creator absent from a batch response.
pub async fn touch_checked(pool: &PgPool, creator_id: &str, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE creators SET last_checked_at = $2, updated_at = $2 WHERE id = $1")
        .bind(creator_id)
        .bind(now)
        .execute(pool)
        .await?;

    Ok(())
}

/// Apply a refreshed account: update the five metrics and append a history
/// snapshot atomically. A previously deleted creator comes back alive.
pub async fn apply_account(
    pool: &PgPool,
    creator_id: &str,
    metrics: &CreatorMetrics,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE creators
        SET username = $1, display_name = $2, media_likes = $3, post_likes = $4,
            followers = $5, image_count = $6, video_count = $7,
            last_checked_at = $8, is_deleted = FALSE, deleted_detected_at = NULL, updated_at = $8
        WHERE id = $9
        "#,
    )
    .bind(&metrics.username)
    .bind(&metrics.display_name)
    .bind(metrics.media_likes)
    .bind(metrics.post_likes)
    .bind(metrics.followers)
    .bind(metrics.image_count)
    .bind(metrics.video_count)
    .bind(now)
    .bind(creator_id)
    .execute(&mut *tx)
    .await
    .context("failed to update creator")?;

    sqlx::query(
        r#"
        INSERT INTO creator_history (creator_id, media_likes, post_likes, followers, image_count, video_count)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(creator_id)
    .bind(metrics.media_likes)
    .bind(metrics.post_likes)
    .bind(metrics.followers)
    .bind(metrics.image_count)
    .bind(metrics.video_count)
    .execute(&mut *tx)
    .await
    .context("failed to append creator history")?;

    tx.commit().await?;
    Ok(())
}

/// Insert a creator first seen via discovery or an explicit request, with its
/// first history snapshot.
pub async fn create_from_account(
    pool: &PgPool,
    creator_id: &str,
    metrics: &CreatorMetrics,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO creators (id, username, display_name, media_likes, post_likes, followers,
                              image_count, video_count, last_checked_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(creator_id)
    .bind(&metrics.username)
    .bind(&metrics.display_name)
    .bind(metrics.media_likes)
    .bind(metrics.post_likes)
    .bind(metrics.followers)
    .bind(metrics.image_count)
    .bind(metrics.video_count)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("failed to create creator")?;

    sqlx::query(
        r#"
        INSERT INTO creator_history (creator_id, media_likes, post_likes, followers, image_count, video_count)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(creator_id)
    .bind(metrics.media_likes)
    .bind(metrics.post_likes)
    .bind(metrics.followers)
    .bind(metrics.image_count)
    .bind(metrics.video_count)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// History rows for a set of creators, newest first per creator.
pub async fn history_for_creators(
    pool: &PgPool,
    creator_ids: &[String],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<CreatorHistory>> {
    let rows = match (start, end) {
        (Some(start), Some(end)) => {
            sqlx::query_as::<_, CreatorHistory>(
                r#"
                SELECT id, creator_id, media_likes, post_likes, followers, image_count, video_count, created_at, updated_at
                FROM creator_history
                WHERE creator_id = ANY($1) AND created_at >= $2 AND created_at <= $3
                ORDER BY creator_id, created_at DESC
                "#,
            )
            .bind(creator_ids)
            .bind(start)
            .bind(end)
            .fetch_all(pool)
            .await?
        }
        _ => {
            sqlx::query_as::<_, CreatorHistory>(
                r#"
                SELECT id, creator_id, media_likes, post_likes, followers, image_count, video_count, created_at, updated_at
                FROM creator_history
                WHERE creator_id = ANY($1)
                ORDER BY creator_id, created_at DESC
                "#,
            )
            .bind(creator_ids)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows)
}

/// Filters for the creator listing.
#[derive(Debug, Clone)]
pub struct CreatorListFilter {
    pub page: i64,
    pub limit: i64,
    pub search: Option<String>,
    pub sort_by: String,
    pub sort_desc: bool,
}

pub async fn list_creators(pool: &PgPool, filter: &CreatorListFilter) -> Result<(Vec<Creator>, i64)> {
    let sort_column = match filter.sort_by.as_str() {
        "mediaLikes" => "media_likes",
        "postLikes" => "post_likes",
        "imageCount" => "image_count",
        "videoCount" => "video_count",
        "updatedAt" => "updated_at",
        "username" => "username",
        "rank" => "rank",
        _ => "followers",
    };
    let order = if filter.sort_desc { "DESC" } else { "ASC" };

    // Followers-descending gets a stable secondary order; rank sorting only
    // makes sense over ranked rows.
    let order_clause = if sort_column == "followers" && filter.sort_desc {
        "followers DESC, created_at DESC".to_string()
    } else {
        format!("{sort_column} {order}")
    };
    let rank_condition = if sort_column == "rank" {
        "rank IS NOT NULL"
    } else {
        "TRUE"
    };
    let offset = (filter.page - 1).max(0) * filter.limit;

    let (total, rows) = if let Some(search) = &filter.search {
        let pattern = format!("%{search}%");
        let (total,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM creators WHERE {rank_condition} AND (username ILIKE $1 OR display_name ILIKE $1)"
        ))
        .bind(&pattern)
        .fetch_one(pool)
        .await?;
        let rows = sqlx::query_as::<_, Creator>(&format!(
            "SELECT {CREATOR_COLUMNS} FROM creators \
             WHERE {rank_condition} AND (username ILIKE $1 OR display_name ILIKE $1) \
             ORDER BY {order_clause} LIMIT $2 OFFSET $3"
        ))
        .bind(&pattern)
        .bind(filter.limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        (total, rows)
    } else {
        let (total,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM creators WHERE {rank_condition}"
        ))
        .fetch_one(pool)
        .await?;
        let rows = sqlx::query_as::<_, Creator>(&format!(
            "SELECT {CREATOR_COLUMNS} FROM creators WHERE {rank_condition} \
             ORDER BY {order_clause} LIMIT $1 OFFSET $2"
        ))
        .bind(filter.limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        (total, rows)
    };

    Ok((rows, total))
}
