use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::models::{CreatorStatistics, TagStatistics};

const TAG_STATS_COLUMNS: &str = "id, total_view_count, change_24h, change_percent_24h, \
     total_post_count, post_change_24h, post_change_percent_24h, calculated_at, created_at, updated_at";

const CREATOR_STATS_COLUMNS: &str = "id, total_followers, followers_change_24h, followers_change_percent_24h, \
     total_media_likes, media_likes_change_24h, media_likes_change_percent_24h, \
     total_post_likes, post_likes_change_24h, post_likes_change_percent_24h, \
     calculated_at, created_at, updated_at";

fn percent(change: i64, prior_total: i64) -> f64 {
    if prior_total > 0 {
        change as f64 / prior_total as f64 * 100.0
    } else {
        0.0
    }
}

/// Append a tag rollup row: current totals over live tags plus 24-hour deltas
/// against the newest rollup at least a day old.
pub async fn calculate_tag_statistics(pool: &PgPool, now: DateTime<Utc>) -> Result<TagStatistics> {
    let mut tx = pool.begin().await?;

    let (total_view_count, total_post_count): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(view_count), 0)::BIGINT, COALESCE(SUM(post_count), 0)::BIGINT
        FROM tags
        WHERE is_deleted = FALSE
        "#,
    )
    .fetch_one(&mut *tx)
    .await
    .context("failed to calculate tag totals")?;

    let baseline = now - Duration::hours(24);
    let prior = sqlx::query_as::<_, TagStatistics>(&format!(
        r#"
        SELECT {TAG_STATS_COLUMNS}
        FROM tag_statistics
        WHERE calculated_at <= $1
        ORDER BY calculated_at DESC
        LIMIT 1
        "#
    ))
    .bind(baseline)
    .fetch_optional(&mut *tx)
    .await?;

    let (change_24h, change_percent_24h, post_change_24h, post_change_percent_24h) = match &prior {
        Some(prior) => {
            let change = total_view_count - prior.total_view_count;
            let post_change = total_post_count - prior.total_post_count;
            (
                change,
                percent(change, prior.total_view_count),
                post_change,
                percent(post_change, prior.total_post_count),
            )
        }
        None => (0, 0.0, 0, 0.0),
    };

    let inserted = sqlx::query_as::<_, TagStatistics>(&format!(
        r#"
        INSERT INTO tag_statistics
            (total_view_count, change_24h, change_percent_24h,
             total_post_count, post_change_24h, post_change_percent_24h, calculated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {TAG_STATS_COLUMNS}
        "#
    ))
    .bind(total_view_count)
    .bind(change_24h)
    .bind(change_percent_24h)
    .bind(total_post_count)
    .bind(post_change_24h)
    .bind(post_change_percent_24h)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert tag statistics")?;

    tx.commit().await?;
    Ok(inserted)
}

/// Append a creator rollup row over the three creator metrics.
pub async fn calculate_creator_statistics(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<CreatorStatistics> {
    let mut tx = pool.begin().await?;

    let (total_followers, total_media_likes, total_post_likes): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(followers), 0)::BIGINT,
               COALESCE(SUM(media_likes), 0)::BIGINT,
               COALESCE(SUM(post_likes), 0)::BIGINT
        FROM creators
        WHERE is_deleted = FALSE
        "#,
    )
    .fetch_one(&mut *tx)
    .await
    .context("failed to calculate creator totals")?;

    let baseline = now - Duration::hours(24);
    let prior = sqlx::query_as::<_, CreatorStatistics>(&format!(
        r#"
        SELECT {CREATOR_STATS_COLUMNS}
        FROM creator_statistics
        WHERE calculated_at <= $1
        ORDER BY calculated_at DESC
        LIMIT 1
        "#
    ))
    .bind(baseline)
    .fetch_optional(&mut *tx)
    .await?;

    let (followers_change, media_likes_change, post_likes_change) = match &prior {
        Some(prior) => (
            total_followers - prior.total_followers,
            total_media_likes - prior.total_media_likes,
            total_post_likes - prior.total_post_likes,
        ),
        None => (0, 0, 0),
    };
    let (followers_pct, media_likes_pct, post_likes_pct) = match &prior {
        Some(prior) => (
            percent(followers_change, prior.total_followers),
            percent(media_likes_change, prior.total_media_likes),
            percent(post_likes_change, prior.total_post_likes),
        ),
        None => (0.0, 0.0, 0.0),
    };

    let inserted = sqlx::query_as::<_, CreatorStatistics>(&format!(
        r#"
        INSERT INTO creator_statistics
            (total_followers, followers_change_24h, followers_change_percent_24h,
             total_media_likes, media_likes_change_24h, media_likes_change_percent_24h,
             total_post_likes, post_likes_change_24h, post_likes_change_percent_24h, calculated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {CREATOR_STATS_COLUMNS}
        "#
    ))
    .bind(total_followers)
    .bind(followers_change)
    .bind(followers_pct)
    .bind(total_media_likes)
    .bind(media_likes_change)
    .bind(media_likes_pct)
    .bind(total_post_likes)
    .bind(post_likes_change)
    .bind(post_likes_pct)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert creator statistics")?;

    tx.commit().await?;
    Ok(inserted)
}

/// Newest tag rollup, if any exists yet.
pub async fn latest_tag_statistics(pool: &PgPool) -> Result<Option<TagStatistics>> {
    let row = sqlx::query_as::<_, TagStatistics>(&format!(
        "SELECT {TAG_STATS_COLUMNS} FROM tag_statistics ORDER BY calculated_at DESC LIMIT 1"
    ))
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn latest_creator_statistics(pool: &PgPool) -> Result<Option<CreatorStatistics>> {
    let row = sqlx::query_as::<_, CreatorStatistics>(&format!(
        "SELECT {CREATOR_STATS_COLUMNS} FROM creator_statistics ORDER BY calculated_at DESC LIMIT 1"
    ))
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_zero_when_prior_total_is_zero() {
        assert_eq!(percent(100, 0), 0.0);
        assert_eq!(percent(-50, 0), 0.0);
    }

    #[test]
    fn percent_computes_relative_change() {
        assert!((percent(200, 1000) - 20.0).abs() < 1e-9);
        assert!((percent(-100, 1000) + 10.0).abs() < 1e-9);
    }
}
