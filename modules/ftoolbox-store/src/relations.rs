use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;

/// Parameters for the related-tag ranking, already clamped to their
/// documented bounds.
#[derive(Debug, Clone)]
pub struct RelatedParams {
    pub window_days: i64,
    pub min_view_count: i64,
    pub limit: usize,
    pub min_coverage: i64,
}

impl RelatedParams {
    /// Clamp raw query inputs. `min_coverage` of `None` picks the default
    /// ceil(0.4 · |S|); either way the result lands in [1, num_inputs].
    pub fn clamped(
        window_days: Option<i64>,
        min_view_count: Option<i64>,
        limit: Option<usize>,
        min_coverage: Option<i64>,
        num_inputs: usize,
    ) -> Self {
        let window_days = window_days.unwrap_or(14).clamp(7, 30);
        let min_view_count = min_view_count.unwrap_or(5000).max(0);
        let limit = limit.unwrap_or(10).clamp(1, 20);
        let min_coverage = min_coverage
            .unwrap_or_else(|| default_min_coverage(num_inputs))
            .clamp(1, num_inputs.max(1) as i64);

        Self {
            window_days,
            min_view_count,
            limit,
            min_coverage,
        }
    }
}

/// Default coverage floor: 40% of the source set, rounded up, at least one.
pub fn default_min_coverage(num_inputs: usize) -> i64 {
    ((num_inputs as f64 * 0.4).ceil() as i64).max(1)
}

/// One aggregate row out of the co-occurrence join, before scoring.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RelatedCandidate {
    pub id: String,
    pub tag: String,
    pub post_count: i64,
    pub norm_sum: f64,
    pub coverage_cnt: i64,
}

/// A fully scored related tag.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredRelatedTag {
    pub id: String,
    pub tag: String,
    pub norm_score: f64,
    pub coverage: f64,
    pub final_score: f64,
}

/// Additively upsert one discovery run's directed co-occurrence counts into
/// the daily bucket. Counts are commutative, so concurrent runs are safe.
pub async fn upsert_daily_counts(
    pool: &PgPool,
    counts: &HashMap<(String, String), i64>,
    bucket_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<()> {
    if counts.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for ((tag_id, related_tag_id), delta) in counts {
        sqlx::query(
            r#"
            INSERT INTO tag_relations_daily (tag_id, related_tag_id, bucket_date, co_count, last_seen_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tag_id, related_tag_id, bucket_date)
            DO UPDATE SET co_count = tag_relations_daily.co_count + EXCLUDED.co_count,
                          last_seen_at = EXCLUDED.last_seen_at
            "#,
        )
        .bind(tag_id)
        .bind(related_tag_id)
        .bind(bucket_date)
        .bind(delta)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("failed to upsert tag relation")?;
    }
    tx.commit().await?;

    Ok(())
}

/// Drop relation buckets older than `window_days`. Returns rows removed.
pub async fn purge_older_than(pool: &PgPool, window_days: i64) -> Result<u64> {
    let cutoff = (Utc::now() - chrono::Duration::days(window_days)).date_naive();
    let result = sqlx::query("DELETE FROM tag_relations_daily WHERE bucket_date < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Aggregate candidate related tags for a source set: per-source normalized
/// co-count sums plus distinct-source coverage, filtered by liveness, view
/// floor, and the coverage floor. Sources with zero posts contribute nothing.
pub async fn related_candidates(
    pool: &PgPool,
    source_ids: &[String],
    params: &RelatedParams,
) -> Result<Vec<RelatedCandidate>> {
    let cutoff = (Utc::now() - chrono::Duration::days(params.window_days)).date_naive();

    let rows = sqlx::query_as::<_, RelatedCandidate>(
        r#"
        SELECT t.id,
               t.tag,
               t.post_count,
               COALESCE(SUM(tr.co_count::double precision / NULLIF(ts.post_count, 0)), 0) AS norm_sum,
               COUNT(DISTINCT tr.tag_id) AS coverage_cnt
        FROM tag_relations_daily tr
        JOIN tags t ON t.id = tr.related_tag_id
        JOIN tags ts ON ts.id = tr.tag_id
        WHERE tr.tag_id = ANY($1)
          AND tr.bucket_date >= $2
          AND t.is_deleted = FALSE
          AND t.view_count >= $3
          AND NOT (tr.related_tag_id = ANY($1))
        GROUP BY t.id, t.tag, t.post_count
        HAVING COUNT(DISTINCT tr.tag_id) >= $4
        "#,
    )
    .bind(source_ids)
    .bind(cutoff)
    .bind(params.min_view_count)
    .bind(params.min_coverage)
    .fetch_all(pool)
    .await
    .context("failed to query related tag candidates")?;

    Ok(rows)
}

/// Score and order candidates: normalized average × coverage × a gentle
/// popularity boost, capped so ultra-popular tags cannot dominate outright.
pub fn score_candidates(
    candidates: Vec<RelatedCandidate>,
    num_inputs: usize,
    limit: usize,
) -> Vec<ScoredRelatedTag> {
    let n = num_inputs.max(1) as f64;

    let mut scored: Vec<ScoredRelatedTag> = candidates
        .into_iter()
        .map(|c| {
            let norm_avg = c.norm_sum / n;
            let coverage = c.coverage_cnt as f64 / n;
            let capped_posts = c.post_count.clamp(0, 50_000) as f64;
            let pop_boost = capped_posts.ln_1p().powf(0.2).max(1.0);
            ScoredRelatedTag {
                id: c.id,
                tag: c.tag,
                norm_score: norm_avg,
                coverage,
                final_score: norm_avg * coverage * pop_boost,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}
