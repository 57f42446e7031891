use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use fansly_client::{FanslyAccount, FanslyClient};
use ftoolbox_store::creators;
use ftoolbox_store::models::CreatorMetrics;
use ftoolbox_store::tags::STALENESS_HOURS;

use crate::scheduler::Worker;

const CREATOR_UPDATE_BATCH_SIZE: i64 = 100;

/// Refreshes stale creators in one batched account lookup. Accounts absent
/// from the batch are only touched; deletion detection stays out of this
/// path for now.
pub struct CreatorUpdater {
    pool: PgPool,
    client: Arc<FanslyClient>,
    interval: Duration,
}

impl CreatorUpdater {
    pub fn new(pool: PgPool, client: Arc<FanslyClient>, interval: Duration) -> Self {
        Self {
            pool,
            client,
            interval,
        }
    }

    /// Insert or refresh creators from an accounts block, as discovery and
    /// the request endpoint see them. Recently checked creators are skipped.
    pub async fn process_accounts(&self, accounts: &[FanslyAccount]) -> Result<()> {
        if accounts.is_empty() {
            debug!("No creators to process");
            return Ok(());
        }

        info!(accounts = accounts.len(), "Processing creators");

        let cutoff = Utc::now() - ChronoDuration::hours(STALENESS_HOURS);
        let mut created = 0usize;
        let mut updated = 0usize;

        for account in accounts {
            let metrics = metrics_from_account(account);
            match creators::find_by_id(&self.pool, &account.id).await {
                Ok(Some(existing)) => {
                    if existing.last_checked_at.is_some_and(|t| t > cutoff) {
                        continue;
                    }
                    if existing.is_deleted {
                        info!(username = %existing.username, "Creator exists again, clearing deleted status");
                    }
                    match creators::apply_account(&self.pool, &account.id, &metrics, Utc::now())
                        .await
                    {
                        Ok(()) => updated += 1,
                        Err(e) => {
                            error!(username = %account.username, error = %e, "Failed to update creator")
                        }
                    }
                }
                Ok(None) => {
                    match creators::create_from_account(&self.pool, &account.id, &metrics, Utc::now())
                        .await
                    {
                        Ok(()) => {
                            info!(
                                username = %account.username,
                                followers = account.follow_count,
                                "Created new creator"
                            );
                            created += 1;
                        }
                        Err(e) => {
                            error!(username = %account.username, error = %e, "Failed to create creator")
                        }
                    }
                }
                Err(e) => {
                    error!(account_id = %account.id, error = %e, "Failed to query creator");
                }
            }
        }

        info!(
            processed = accounts.len(),
            new = created,
            updated,
            "Creator processing completed"
        );
        Ok(())
    }
}

/// Display names fall back to the username when empty.
pub(crate) fn metrics_from_account(account: &FanslyAccount) -> CreatorMetrics {
    let display_name = if account.display_name.is_empty() {
        account.username.clone()
    } else {
        account.display_name.clone()
    };

    CreatorMetrics {
        username: account.username.clone(),
        display_name,
        media_likes: account.account_media_likes,
        post_likes: account.post_likes,
        followers: account.follow_count,
        image_count: account.timeline_stats.image_count,
        video_count: account.timeline_stats.video_count,
    }
}

#[async_trait]
impl Worker for CreatorUpdater {
    fn name(&self) -> &'static str {
        "creator-updater"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let stale = creators::stale_creators(&self.pool, CREATOR_UPDATE_BATCH_SIZE).await?;
        if stale.is_empty() {
            debug!("No creators need updating");
            return Ok(());
        }

        let ids: Vec<String> = stale.iter().map(|c| c.id.clone()).collect();
        info!(count = ids.len(), "Updating creators");

        let accounts = self.client.get_accounts(cancel, &ids).await?;
        let accounts_by_id: HashMap<&str, &FanslyAccount> =
            accounts.iter().map(|a| (a.id.as_str(), a)).collect();

        let mut updated = 0usize;
        let mut missing = 0usize;

        for creator in &stale {
            match accounts_by_id.get(creator.id.as_str()) {
                None => {
                    // A soft miss: mark it checked and move on.
                    if let Err(e) = creators::touch_checked(&self.pool, &creator.id, Utc::now()).await
                    {
                        error!(
                            creator_id = %creator.id,
                            username = %creator.username,
                            error = %e,
                            "Failed to update creator after missing account lookup"
                        );
                        continue;
                    }
                    missing += 1;
                }
                Some(account) => {
                    if creator.is_deleted {
                        info!(username = %creator.username, "Creator exists again, clearing deleted status");
                    }
                    let metrics = metrics_from_account(account);
                    match creators::apply_account(&self.pool, &creator.id, &metrics, Utc::now())
                        .await
                    {
                        Ok(()) => updated += 1,
                        Err(e) => {
                            error!(username = %creator.username, error = %e, "Failed to update creator")
                        }
                    }
                }
            }
        }

        info!(
            requested = stale.len(),
            fetched = accounts.len(),
            updated,
            missing,
            "Creator updater run completed"
        );
        Ok(())
    }
}
