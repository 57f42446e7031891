use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use fansly_client::{FanslyClient, FanslyError};
use ftoolbox_store::models::Tag;
use ftoolbox_store::tags;

use crate::scheduler::Worker;

const UPDATE_BATCH_SIZE: i64 = 20;

/// Refreshes stale tags from the upstream: counters and history on success,
/// the deletion transition on not-found.
pub struct TagUpdater {
    pool: PgPool,
    client: Arc<FanslyClient>,
    interval: Duration,
}

impl TagUpdater {
    pub fn new(pool: PgPool, client: Arc<FanslyClient>, interval: Duration) -> Self {
        Self {
            pool,
            client,
            interval,
        }
    }

    async fn update_tag(&self, cancel: &CancellationToken, tag: &Tag) -> Result<()> {
        let details = match self.client.get_tag(cancel, &tag.tag).await {
            Ok(details) => details,
            Err(FanslyError::TagNotFound) => {
                if !tag.is_deleted {
                    info!(tag = %tag.tag, "Tag no longer exists upstream, marking as deleted");
                }
                tags::mark_deleted(&self.pool, &tag.id, Utc::now()).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if tag.is_deleted {
            info!(tag = %tag.tag, "Tag exists again upstream, clearing deleted status");
        }

        let (change, post_count_change) = tags::apply_refresh(
            &self.pool,
            tag,
            details.tag.view_count,
            details.tag.post_count,
            Utc::now(),
        )
        .await?;

        debug!(
            tag = %tag.tag,
            view_count = details.tag.view_count,
            change,
            post_count_change,
            "Updated tag"
        );
        Ok(())
    }
}

#[async_trait]
impl Worker for TagUpdater {
    fn name(&self) -> &'static str {
        "tag-updater"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let stale = tags::stale_tags(&self.pool, UPDATE_BATCH_SIZE).await?;
        if stale.is_empty() {
            debug!("No tags need updating");
            return Ok(());
        }

        info!(count = stale.len(), "Updating tags");

        for tag in &stale {
            if cancel.is_cancelled() {
                return Err(FanslyError::Cancelled.into());
            }

            if let Err(e) = self.update_tag(cancel, tag).await {
                if let Some(FanslyError::Cancelled) = e.downcast_ref::<FanslyError>() {
                    return Err(e);
                }
                error!(tag = %tag.tag, error = %e, "Failed to update tag");

                // Touch anyway so the failing tag is not retried on every tick.
                if let Err(touch_err) = tags::touch_checked(&self.pool, &tag.id, Utc::now()).await {
                    error!(tag = %tag.tag, error = %touch_err, "Failed to update last checked time after error");
                }
            }
        }

        Ok(())
    }
}
