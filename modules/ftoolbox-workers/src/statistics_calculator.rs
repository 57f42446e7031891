use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ftoolbox_store::statistics;

use crate::scheduler::Worker;

/// Appends the periodic 24-hour rollup rows for tags and creators.
pub struct StatisticsCalculator {
    pool: PgPool,
    interval: Duration,
}

impl StatisticsCalculator {
    pub fn new(pool: PgPool, interval: Duration) -> Self {
        Self { pool, interval }
    }
}

#[async_trait]
impl Worker for StatisticsCalculator {
    fn name(&self) -> &'static str {
        "statistics-calculator"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, _cancel: &CancellationToken) -> Result<()> {
        // The creator rollup still runs when the tag rollup fails.
        match statistics::calculate_tag_statistics(&self.pool, Utc::now()).await {
            Ok(stats) => info!(
                total_view_count = stats.total_view_count,
                total_post_count = stats.total_post_count,
                change_24h = stats.change_24h,
                "Tag statistics calculated"
            ),
            Err(e) => error!(error = %e, "Failed to calculate tag statistics"),
        }

        let stats = statistics::calculate_creator_statistics(&self.pool, Utc::now()).await?;
        info!(
            total_followers = stats.total_followers,
            total_media_likes = stats.total_media_likes,
            total_post_likes = stats.total_post_likes,
            "Creator statistics calculated"
        );

        Ok(())
    }
}
