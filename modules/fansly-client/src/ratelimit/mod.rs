mod adaptive;
mod global;

pub use adaptive::{AdaptiveRateLimiter, PersistedEndpoint, RateLimitStore};
pub use global::GlobalRateLimiter;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::FanslyError;

/// Sleep for `duration` unless the token fires first.
pub(crate) async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), FanslyError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(FanslyError::Cancelled),
    }
}
