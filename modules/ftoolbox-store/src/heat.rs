use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Time-decayed engagement score for a tag.
///
/// Post count dominates the engagement mix (active usage) with views scaled
/// far down; a log compresses the range and the result halves every 48 hours
/// since the tag was last seen live. A zero view count is the deletion
/// sentinel and always scores zero.
pub fn heat_score(
    view_count: i64,
    post_count: i64,
    last_checked_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    if view_count == 0 {
        return 0.0;
    }

    let engagement = post_count as f64 * 0.7 + view_count as f64 * 0.0003;
    let base = (engagement + 1.0).log10();

    let hours_since = (now - last_checked_at).num_milliseconds() as f64 / 3_600_000.0;
    let decay = 0.5_f64.powf(hours_since / 48.0);

    let heat = base * decay * 1000.0;
    (heat * 100.0).round() / 100.0
}

/// Recompute heat for every live tag. Tags never checked decay from their
/// local creation instant. Returns how many rows were updated.
pub async fn recalculate_tag_heat(pool: &PgPool) -> Result<u64> {
    let rows = sqlx::query_as::<_, (String, i64, i64, Option<DateTime<Utc>>, DateTime<Utc>)>(
        r#"
        SELECT id, view_count, post_count, last_checked_at, created_at
        FROM tags
        WHERE is_deleted = FALSE
        "#,
    )
    .fetch_all(pool)
    .await?;

    let now = Utc::now();
    let mut updated = 0u64;

    let mut tx = pool.begin().await?;
    for (id, view_count, post_count, last_checked_at, created_at) in rows {
        let heat = heat_score(
            view_count,
            post_count,
            last_checked_at.unwrap_or(created_at),
            now,
        );
        sqlx::query("UPDATE tags SET heat = $1 WHERE id = $2")
            .bind(heat)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        updated += 1;
    }
    tx.commit().await?;

    Ok(updated)
}

/// Live tags with the default zero heat, used for the boot-time backfill.
pub async fn unscored_tag_count(pool: &PgPool) -> Result<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM tags WHERE heat = 0 AND is_deleted = FALSE")
            .fetch_one(pool)
            .await?;
    Ok(count)
}
