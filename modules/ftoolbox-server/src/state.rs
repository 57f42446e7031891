use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use fansly_client::{FanslyClient, GlobalRateLimiter};
use ftoolbox_workers::CreatorUpdater;

/// Shared state for every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub client: Arc<FanslyClient>,
    /// Insert/refresh path shared with the discovery worker, used by the
    /// creator request endpoint.
    pub creator_updater: Arc<CreatorUpdater>,
    /// Inbound sliding-window limiter; over-limit requests get 429.
    pub api_limiter: Arc<GlobalRateLimiter>,
    /// Fires on SIGINT/SIGTERM; handlers pass it to upstream calls.
    pub shutdown: CancellationToken,
}
