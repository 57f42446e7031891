use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fansly_client::FanslyError;
use ftoolbox_store::cleanup;

use crate::scheduler::Worker;

const MIN_VIEWS: i64 = 500;

/// Deletes low-signal tags and everything hanging off them.
pub struct TagCleanup {
    pool: PgPool,
    interval: Duration,
}

impl TagCleanup {
    pub fn new(pool: PgPool, interval: Duration) -> Self {
        Self { pool, interval }
    }
}

#[async_trait]
impl Worker for TagCleanup {
    fn name(&self) -> &'static str {
        "tag-cleanup"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(FanslyError::Cancelled.into());
        }

        let pending = cleanup::count_low_signal_tags(&self.pool, MIN_VIEWS).await?;
        if pending == 0 {
            debug!("No tags to clean up");
            return Ok(());
        }

        if cancel.is_cancelled() {
            return Err(FanslyError::Cancelled.into());
        }

        let deleted = cleanup::delete_low_signal_tags(&self.pool, MIN_VIEWS).await?;
        info!(deleted, min_views = MIN_VIEWS, "Tag cleanup completed");

        Ok(())
    }
}
