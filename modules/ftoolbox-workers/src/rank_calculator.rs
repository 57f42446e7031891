use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use ftoolbox_store::{heat, ranks};

use crate::scheduler::Worker;

/// Recomputes the global orderings and per-tag heat in bulk.
pub struct RankCalculator {
    pool: PgPool,
    interval: Duration,
}

impl RankCalculator {
    pub fn new(pool: PgPool, interval: Duration) -> Self {
        Self { pool, interval }
    }
}

#[async_trait]
impl Worker for RankCalculator {
    fn name(&self) -> &'static str {
        "rank-calculator"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, _cancel: &CancellationToken) -> Result<()> {
        let started = tokio::time::Instant::now();

        ranks::recalculate_tag_ranks(&self.pool).await?;
        ranks::recalculate_creator_ranks(&self.pool).await?;
        let heated = heat::recalculate_tag_heat(&self.pool).await?;

        info!(
            heated_tags = heated,
            duration_ms = started.elapsed().as_millis() as u64,
            "Rank calculation completed"
        );
        Ok(())
    }
}
