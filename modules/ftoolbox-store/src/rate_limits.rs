use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use fansly_client::{PersistedEndpoint, RateLimitStore};

/// Database-backed persistence for the adaptive rate limiter's learned
/// per-endpoint configurations.
pub struct RateLimitPersistence {
    pool: PgPool,
}

impl RateLimitPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitStore for RateLimitPersistence {
    async fn load(&self) -> Result<Vec<PersistedEndpoint>> {
        let rows = sqlx::query_as::<
            _,
            (String, i32, i64, i32, i32, f64, Option<DateTime<Utc>>),
        >(
            r#"
            SELECT id, request_limit, window_seconds, success_streak, rate_limit_hits,
                   backoff_multiplier, last_rate_limit_hit
            FROM rate_limits
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(endpoint, limit, window_seconds, streak, hits, multiplier, last_hit)| {
                    PersistedEndpoint {
                        endpoint,
                        limit,
                        window_seconds,
                        success_streak: streak,
                        rate_limit_hits: hits,
                        backoff_multiplier: multiplier,
                        last_rate_limit_hit: last_hit,
                    }
                },
            )
            .collect())
    }

    async fn save(&self, endpoints: &[PersistedEndpoint]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for endpoint in endpoints {
            sqlx::query(
                r#"
                INSERT INTO rate_limits
                    (id, request_limit, window_seconds, success_streak, rate_limit_hits,
                     backoff_multiplier, last_rate_limit_hit)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO UPDATE SET
                    request_limit = EXCLUDED.request_limit,
                    window_seconds = EXCLUDED.window_seconds,
                    success_streak = EXCLUDED.success_streak,
                    rate_limit_hits = EXCLUDED.rate_limit_hits,
                    backoff_multiplier = EXCLUDED.backoff_multiplier,
                    last_rate_limit_hit = EXCLUDED.last_rate_limit_hit,
                    updated_at = now()
                "#,
            )
            .bind(&endpoint.endpoint)
            .bind(endpoint.limit)
            .bind(endpoint.window_seconds)
            .bind(endpoint.success_streak)
            .bind(endpoint.rate_limit_hits)
            .bind(endpoint.backoff_multiplier)
            .bind(endpoint.last_rate_limit_hit)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
