use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use fansly_client::{FanslyClient, FanslyError, FanslyTag, MediaOfferSuggestion};
use ftoolbox_store::models::NewTag;
use ftoolbox_store::{relations, tags};

use crate::creator_updater::CreatorUpdater;
use crate::scheduler::Worker;

const SUGGESTION_PAGE_SIZE: u32 = 20;
const PROBE_COOLDOWN_HOURS: i64 = 3;
const PROBE_POOL_SIZE: i64 = 10;
const RELATION_WINDOW_DAYS: i64 = 14;

/// Mines the suggestion feed of one probe tag per run: inserts newly seen
/// tags, accumulates the day's co-occurrence edges, and bootstraps creators
/// from the accounts block.
pub struct TagDiscovery {
    pool: PgPool,
    client: Arc<FanslyClient>,
    interval: Duration,
    seed_tags: Vec<&'static str>,
}

impl TagDiscovery {
    pub fn new(pool: PgPool, client: Arc<FanslyClient>, interval: Duration) -> Self {
        Self {
            pool,
            client,
            interval,
            seed_tags: vec![
                "blonde", "brunette", "redhead", "cosplay", "fitness", "tattoo", "lingerie",
            ],
        }
    }

    /// Pick the next probe: a live, rank-ordered tag outside its cool-down,
    /// chosen pseudorandomly from the top of the pool so a failing probe
    /// cannot wedge the rotation. Falls back to the fixed seed list.
    async fn pick_probe(&self) -> Result<Option<String>> {
        let candidates = tags::discovery_candidates(
            &self.pool,
            ChronoDuration::hours(PROBE_COOLDOWN_HOURS),
            PROBE_POOL_SIZE,
        )
        .await?;

        if !candidates.is_empty() {
            let idx = (Utc::now().timestamp() as usize) % candidates.len();
            return Ok(Some(candidates[idx].tag.clone()));
        }

        if self.seed_tags.is_empty() {
            return Ok(None);
        }
        let idx = (Utc::now().timestamp() as usize) % self.seed_tags.len();
        Ok(Some(self.seed_tags[idx].to_string()))
    }

    async fn discover_from(&self, cancel: &CancellationToken, probe: &str) -> Result<()> {
        let details = match self.client.get_tag(cancel, probe).await {
            Ok(details) => details,
            Err(FanslyError::TagNotFound) => {
                info!(tag = probe, "Probe no longer exists upstream, marking as deleted");
                if let Err(e) = tags::mark_deleted_by_label(&self.pool, probe, Utc::now()).await {
                    error!(tag = probe, error = %e, "Failed to mark probe as deleted");
                }
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let suggestions = self
            .client
            .get_suggestions(
                cancel,
                &[details.tag.id.clone()],
                "0",
                "0",
                SUGGESTION_PAGE_SIZE,
                0,
            )
            .await?;

        // New tags out of the union of all suggestion tag lists.
        let discovered = extract_unique_tags(&suggestions.media_offer_suggestions);
        let mut inserted = 0usize;
        for tag in &discovered {
            if cancel.is_cancelled() {
                return Err(FanslyError::Cancelled.into());
            }

            let new_tag = NewTag {
                id: tag.id.clone(),
                tag: tag.tag.to_lowercase().trim().to_string(),
                view_count: tag.view_count,
                post_count: tag.post_count,
                fansly_created_at: tag.created_at_utc(),
            };
            match tags::insert_if_missing(&self.pool, &new_tag).await {
                Ok(true) => {
                    info!(
                        tag = %new_tag.tag,
                        view_count = new_tag.view_count,
                        post_count = new_tag.post_count,
                        "Discovered new tag"
                    );
                    inserted += 1;
                }
                Ok(false) => {}
                Err(e) => error!(tag = %new_tag.tag, error = %e, "Failed to store discovered tag"),
            }
        }

        // The day's directed co-occurrence edges, additively merged.
        let counts = count_directed_pairs(&suggestions.media_offer_suggestions);
        if let Err(e) =
            relations::upsert_daily_counts(&self.pool, &counts, Utc::now().date_naive(), Utc::now())
                .await
        {
            error!(error = %e, "Failed to update tag relations");
        }

        if let Err(e) = relations::purge_older_than(&self.pool, RELATION_WINDOW_DAYS).await {
            error!(error = %e, "Failed to purge old tag relations");
        }

        info!(
            source_tag = probe,
            discovered = discovered.len(),
            new = inserted,
            edges = counts.len(),
            "Tag discovery completed"
        );

        // Discovery doubles as a creator bootstrap.
        if let Some(aggregation) = &suggestions.aggregation_data {
            if !aggregation.accounts.is_empty() {
                let creator_updater =
                    CreatorUpdater::new(self.pool.clone(), Arc::clone(&self.client), self.interval);
                if let Err(e) = creator_updater.process_accounts(&aggregation.accounts).await {
                    error!(error = %e, "Failed to discover creators");
                }
            }
        }

        Ok(())
    }
}

/// Unique tags across all suggestions, keyed by lowercased trimmed label.
/// Blank labels are dropped.
pub(crate) fn extract_unique_tags(suggestions: &[MediaOfferSuggestion]) -> Vec<FanslyTag> {
    let mut by_label: HashMap<String, FanslyTag> = HashMap::new();

    for suggestion in suggestions {
        for tag in &suggestion.post_tags {
            let label = tag.tag.trim().to_lowercase();
            if !label.is_empty() {
                by_label.insert(label, tag.clone());
            }
        }
    }

    by_label.into_values().collect()
}

/// Directed co-occurrence counts for one run: for every suggestion, each
/// ordered pair (a, b) of distinct tag ids on it counts once.
pub(crate) fn count_directed_pairs(
    suggestions: &[MediaOfferSuggestion],
) -> HashMap<(String, String), i64> {
    let mut counts: HashMap<(String, String), i64> = HashMap::new();

    for suggestion in suggestions {
        let unique: HashSet<&str> = suggestion
            .post_tags
            .iter()
            .map(|t| t.id.trim())
            .filter(|id| !id.is_empty())
            .collect();

        for &a in &unique {
            for &b in &unique {
                if a != b {
                    *counts.entry((a.to_string(), b.to_string())).or_default() += 1;
                }
            }
        }
    }

    counts
}

#[async_trait]
impl Worker for TagDiscovery {
    fn name(&self) -> &'static str {
        "tag-discovery"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(probe) = self.pick_probe().await? else {
            debug!("No suitable tag found for discovery");
            return Ok(());
        };

        info!(source_tag = %probe, "Discovering tags");

        let result = self.discover_from(cancel, &probe).await;

        // Always rotate the probe, even after a failure, so a broken probe
        // cannot be selected again and again.
        if let Err(e) = tags::touch_discovery(&self.pool, &probe, Utc::now()).await {
            error!(tag = %probe, error = %e, "Failed to update last_used_for_discovery");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(id: &str, label: &str) -> FanslyTag {
        FanslyTag {
            id: id.to_string(),
            tag: label.to_string(),
            description: String::new(),
            view_count: 0,
            post_count: 0,
            flags: 0,
            created_at: 0,
        }
    }

    fn suggestion(id: &str, tags: Vec<FanslyTag>) -> MediaOfferSuggestion {
        MediaOfferSuggestion {
            id: id.to_string(),
            correlation_id: String::new(),
            post_tags: tags,
        }
    }

    #[test]
    fn extract_dedupes_case_insensitively_and_drops_blanks() {
        let suggestions = vec![
            suggestion("s1", vec![tag("1", "Blonde"), tag("2", "beach"), tag("3", "  ")]),
            suggestion("s2", vec![tag("4", "blonde")]),
        ];

        let mut labels: Vec<String> = extract_unique_tags(&suggestions)
            .iter()
            .map(|t| t.tag.to_lowercase())
            .collect();
        labels.sort();
        assert_eq!(labels, vec!["beach", "blonde"]);
    }

    #[test]
    fn directed_pairs_count_each_post_once() {
        // One post with tags A,B,C and one with B,C.
        let suggestions = vec![
            suggestion("s1", vec![tag("A", "a"), tag("B", "b"), tag("C", "c")]),
            suggestion("s2", vec![tag("B", "b"), tag("C", "c")]),
        ];

        let counts = count_directed_pairs(&suggestions);
        let get = |a: &str, b: &str| counts[&(a.to_string(), b.to_string())];

        assert_eq!(get("A", "B"), 1);
        assert_eq!(get("A", "C"), 1);
        assert_eq!(get("B", "A"), 1);
        assert_eq!(get("B", "C"), 2);
        assert_eq!(get("C", "A"), 1);
        assert_eq!(get("C", "B"), 2);
        assert_eq!(counts.len(), 6);
    }

    #[test]
    fn duplicate_tags_on_one_post_do_not_double_count() {
        let suggestions = vec![suggestion(
            "s1",
            vec![tag("A", "a"), tag("A", "a"), tag("B", "b")],
        )];

        let counts = count_directed_pairs(&suggestions);
        assert_eq!(counts[&("A".to_string(), "B".to_string())], 1);
        assert_eq!(counts[&("B".to_string(), "A".to_string())], 1);
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn single_tag_posts_produce_no_pairs() {
        let suggestions = vec![suggestion("s1", vec![tag("A", "a")])];
        assert!(count_directed_pairs(&suggestions).is_empty());
    }
}
