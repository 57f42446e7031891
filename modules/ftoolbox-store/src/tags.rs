use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::models::{NewTag, Tag, TagHistory};

const TAG_COLUMNS: &str = "id, tag, view_count, post_count, rank, heat, fansly_created_at, \
     last_checked_at, last_used_for_discovery, is_deleted, deleted_detected_at, created_at, updated_at";

/// Hours after which a tag is due for a refresh.
pub const STALENESS_HOURS: i64 = 24;

/// Tags due for a refresh, busiest first.
pub async fn stale_tags(pool: &PgPool, limit: i64) -> Result<Vec<Tag>> {
    let cutoff = Utc::now() - Duration::hours(STALENESS_HOURS);
    let rows = sqlx::query_as::<_, Tag>(&format!(
        r#"
        SELECT {TAG_COLUMNS}
        FROM tags
        WHERE last_checked_at IS NULL OR last_checked_at < $1
        ORDER BY view_count DESC
        LIMIT $2
        "#
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch stale tags")?;

    Ok(rows)
}

pub async fn find_by_label(pool: &PgPool, label: &str) -> Result<Option<Tag>> {
    let row = sqlx::query_as::<_, Tag>(&format!(
        "SELECT {TAG_COLUMNS} FROM tags WHERE tag = $1"
    ))
    .bind(label)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn find_by_labels(pool: &PgPool, labels: &[String]) -> Result<Vec<Tag>> {
    let rows = sqlx::query_as::<_, Tag>(&format!(
        "SELECT {TAG_COLUMNS} FROM tags WHERE tag = ANY($1)"
    ))
    .bind(labels)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Apply a successful refresh: update the live counters and append exactly one
/// history row, atomically. Clears a previous deletion mark, since the tag
/// evidently exists again.
pub async fn apply_refresh(
    pool: &PgPool,
    tag: &Tag,
    view_count: i64,
    post_count: i64,
    now: DateTime<Utc>,
) -> Result<(i64, i64)> {
    let change = view_count - tag.view_count;
    let post_count_change = post_count - tag.post_count;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE tags
        SET view_count = $1, post_count = $2, last_checked_at = $3,
            is_deleted = FALSE, deleted_detected_at = NULL, updated_at = $3
        WHERE id = $4
        "#,
    )
    .bind(view_count)
    .bind(post_count)
    .bind(now)
    .bind(&tag.id)
    .execute(&mut *tx)
    .await
    .context("failed to update tag")?;

    sqlx::query(
        r#"
        INSERT INTO tag_history (tag_id, view_count, change, post_count, post_count_change)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&tag.id)
    .bind(view_count)
    .bind(change)
    .bind(post_count)
    .bind(post_count_change)
    .execute(&mut *tx)
    .await
    .context("failed to append tag history")?;

    tx.commit().await?;
    Ok((change, post_count_change))
}

/// Record that the upstream no longer knows this tag. The first detection
/// stamps `deleted_detected_at`; later sightings keep the original stamp.
/// Always touches `last_checked_at`, and never appends history.
pub async fn mark_deleted(pool: &PgPool, tag_id: &str, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE tags
        SET is_deleted = TRUE,
            deleted_detected_at = CASE WHEN is_deleted THEN deleted_detected_at ELSE $2 END,
            last_checked_at = $2,
            updated_at = $2
        WHERE id = $1
        "#,
    )
    .bind(tag_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_deleted_by_label(pool: &PgPool, label: &str, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE tags
        SET is_deleted = TRUE,
            deleted_detected_at = CASE WHEN is_deleted THEN deleted_detected_at ELSE $2 END,
            updated_at = $2
        WHERE tag = $1
        "#,
    )
    .bind(label)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Touch `last_checked_at` without any other change; keeps a failing tag from
/// being retried on every tick.
pub async fn touch_checked(pool: &PgPool, tag_id: &str, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE tags SET last_checked_at = $2, updated_at = $2 WHERE id = $1")
        .bind(tag_id)
        .bind(now)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stamp a probe as used so discovery rotates even when the probe fails.
pub async fn touch_discovery(pool: &PgPool, label: &str, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE tags SET last_used_for_discovery = $2, updated_at = $2 WHERE tag = $1")
        .bind(label)
        .bind(now)
        .execute(pool)
        .await?;

    Ok(())
}

/// Live tags not probed within the cool-down, best rank first.
pub async fn discovery_candidates(
    pool: &PgPool,
    cooldown: Duration,
    limit: i64,
) -> Result<Vec<Tag>> {
    let cutoff = Utc::now() - cooldown;
    let rows = sqlx::query_as::<_, Tag>(&format!(
        r#"
        SELECT {TAG_COLUMNS}
        FROM tags
        WHERE (last_used_for_discovery IS NULL OR last_used_for_discovery < $1)
          AND is_deleted = FALSE
        ORDER BY rank ASC
        LIMIT $2
        "#
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Insert a newly discovered tag unless it is already tracked.
/// Returns true when a row was actually inserted.
pub async fn insert_if_missing(pool: &PgPool, tag: &NewTag) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO tags (id, tag, view_count, post_count, fansly_created_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(&tag.id)
    .bind(&tag.tag)
    .bind(tag.view_count)
    .bind(tag.post_count)
    .bind(tag.fansly_created_at)
    .execute(pool)
    .await
    .context("failed to insert discovered tag")?;

    Ok(result.rows_affected() == 1)
}

/// Insert an explicitly requested tag with its first history row (change 0).
pub async fn insert_tracked(pool: &PgPool, tag: &NewTag, now: DateTime<Utc>) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO tags (id, tag, view_count, post_count, fansly_created_at, last_checked_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&tag.id)
    .bind(&tag.tag)
    .bind(tag.view_count)
    .bind(tag.post_count)
    .bind(tag.fansly_created_at)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO tag_history (tag_id, view_count, change, post_count, post_count_change)
        VALUES ($1, $2, 0, $3, 0)
        "#,
    )
    .bind(&tag.id)
    .bind(tag.view_count)
    .bind(tag.post_count)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn find_by_id(pool: &PgPool, tag_id: &str) -> Result<Option<Tag>> {
    let row = sqlx::query_as::<_, Tag>(&format!("SELECT {TAG_COLUMNS} FROM tags WHERE id = $1"))
        .bind(tag_id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// History rows for a set of tags, newest first per tag, optionally bounded
/// to a created_at window.
pub async fn history_for_tags(
    pool: &PgPool,
    tag_ids: &[String],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<TagHistory>> {
    let rows = match (start, end) {
        (Some(start), Some(end)) => {
            sqlx::query_as::<_, TagHistory>(
                r#"
                SELECT id, tag_id, view_count, change, post_count, post_count_change, created_at, updated_at
                FROM tag_history
                WHERE tag_id = ANY($1) AND created_at >= $2 AND created_at <= $3
                ORDER BY tag_id, created_at DESC
                "#,
            )
            .bind(tag_ids)
            .bind(start)
            .bind(end)
            .fetch_all(pool)
            .await?
        }
        _ => {
            sqlx::query_as::<_, TagHistory>(
                r#"
                SELECT id, tag_id, view_count, change, post_count, post_count_change, created_at, updated_at
                FROM tag_history
                WHERE tag_id = ANY($1)
                ORDER BY tag_id, created_at DESC
                "#,
            )
            .bind(tag_ids)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows)
}

/// Filters for the ranked tag listing.
#[derive(Debug, Clone, Default)]
pub struct TagListFilter {
    pub page: i64,
    pub limit: i64,
    pub search: Option<String>,
    /// Exact-label filter; when non-empty, pagination is skipped.
    pub labels: Vec<String>,
    pub sort_desc: bool,
}

pub async fn list_ranked(pool: &PgPool, filter: &TagListFilter) -> Result<(Vec<Tag>, i64)> {
    let mut conditions = vec!["rank IS NOT NULL".to_string()];
    if !filter.labels.is_empty() {
        conditions.push("tag = ANY($1)".to_string());
    } else if filter.search.is_some() {
        conditions.push("tag ILIKE $1".to_string());
    }
    let where_clause = conditions.join(" AND ");
    let order = if filter.sort_desc { "DESC" } else { "ASC" };

    let count_sql = format!("SELECT COUNT(*) FROM tags WHERE {where_clause}");
    let mut list_sql = format!(
        "SELECT {TAG_COLUMNS} FROM tags WHERE {where_clause} ORDER BY rank {order}"
    );
    if filter.labels.is_empty() {
        list_sql.push_str(" LIMIT $2 OFFSET $3");
    }

    let offset = (filter.page - 1).max(0) * filter.limit;

    let (total, rows) = if !filter.labels.is_empty() {
        let (total,): (i64,) = sqlx::query_as(&count_sql)
            .bind(&filter.labels)
            .fetch_one(pool)
            .await?;
        let rows = sqlx::query_as::<_, Tag>(&list_sql)
            .bind(&filter.labels)
            .fetch_all(pool)
            .await?;
        (total, rows)
    } else if let Some(search) = &filter.search {
        let pattern = format!("%{search}%");
        let (total,): (i64,) = sqlx::query_as(&count_sql)
            .bind(&pattern)
            .fetch_one(pool)
            .await?;
        let rows = sqlx::query_as::<_, Tag>(&list_sql)
            .bind(&pattern)
            .bind(filter.limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;
        (total, rows)
    } else {
        // No filter binds $1; renumber the pagination placeholders.
        let list_sql = format!(
            "SELECT {TAG_COLUMNS} FROM tags WHERE {where_clause} ORDER BY rank {order} LIMIT $1 OFFSET $2"
        );
        let (total,): (i64,) = sqlx::query_as(&count_sql).fetch_one(pool).await?;
        let rows = sqlx::query_as::<_, Tag>(&list_sql)
            .bind(filter.limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;
        (total, rows)
    };

    Ok((rows, total))
}

/// Filters for the banned (deleted) tag listing.
#[derive(Debug, Clone)]
pub struct BannedListFilter {
    pub page: i64,
    pub limit: i64,
    pub search: Option<String>,
    pub sort_by: String,
    pub sort_desc: bool,
}

/// Aggregate counts shown next to the banned listing.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanStatistics {
    pub total_banned: i64,
    pub banned_last_24h: i64,
    pub banned_last_7d: i64,
    pub banned_last_30d: i64,
}

pub async fn list_banned(pool: &PgPool, filter: &BannedListFilter) -> Result<(Vec<Tag>, i64)> {
    // Whitelist the sort column; anything unknown falls back to detection time.
    let sort_column = match filter.sort_by.as_str() {
        "tag" => "tag",
        "viewCount" => "view_count",
        "postCount" => "post_count",
        _ => "deleted_detected_at",
    };
    let order = if filter.sort_desc { "DESC" } else { "ASC" };
    let offset = (filter.page - 1).max(0) * filter.limit;

    let (total, rows) = if let Some(search) = &filter.search {
        let pattern = format!("%{search}%");
        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tags WHERE is_deleted = TRUE AND tag ILIKE $1")
                .bind(&pattern)
                .fetch_one(pool)
                .await?;
        let rows = sqlx::query_as::<_, Tag>(&format!(
            "SELECT {TAG_COLUMNS} FROM tags WHERE is_deleted = TRUE AND tag ILIKE $1 \
             ORDER BY {sort_column} {order} LIMIT $2 OFFSET $3"
        ))
        .bind(&pattern)
        .bind(filter.limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        (total, rows)
    } else {
        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tags WHERE is_deleted = TRUE")
                .fetch_one(pool)
                .await?;
        let rows = sqlx::query_as::<_, Tag>(&format!(
            "SELECT {TAG_COLUMNS} FROM tags WHERE is_deleted = TRUE \
             ORDER BY {sort_column} {order} LIMIT $1 OFFSET $2"
        ))
        .bind(filter.limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        (total, rows)
    };

    Ok((rows, total))
}

pub async fn ban_statistics(pool: &PgPool) -> Result<BanStatistics> {
    let now = Utc::now();
    let (total_banned,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM tags WHERE is_deleted = TRUE")
            .fetch_one(pool)
            .await?;

    let mut windows = [0i64; 3];
    for (i, hours) in [24i64, 24 * 7, 24 * 30].iter().enumerate() {
        let cutoff = now - Duration::hours(*hours);
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tags WHERE is_deleted = TRUE AND deleted_detected_at >= $1",
        )
        .bind(cutoff)
        .fetch_one(pool)
        .await?;
        windows[i] = count;
    }

    Ok(BanStatistics {
        total_banned,
        banned_last_24h: windows[0],
        banned_last_7d: windows[1],
        banned_last_30d: windows[2],
    })
}
