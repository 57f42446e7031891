use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::sleep_or_cancel;
use crate::error::FanslyError;

/// Sliding-window limiter shared by every endpoint: at most `max_requests`
/// grants in any `window`, with grants spread at least `window / max_requests`
/// apart once the window has traffic.
pub struct GlobalRateLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<Vec<Instant>>,
}

enum Gate {
    /// Window is full; retry after this long.
    Full(Duration),
    /// Grant recorded; optionally sleep out the even-spacing deficit first.
    Granted(Option<Duration>),
}

impl GlobalRateLimiter {
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window: Duration::from_secs(window_seconds.max(1)),
            timestamps: Mutex::new(Vec::new()),
        }
    }

    /// Block until a request may go out. The grant timestamp recorded is the
    /// moment `wait` returns, so spacing holds between consecutive returns.
    /// Cancellation aborts any sleep and leaves no grant behind.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), FanslyError> {
        loop {
            let gate = self.check_and_record();

            match gate {
                Gate::Full(wait_for) => {
                    info!(
                        max_requests = self.max_requests,
                        window_ms = self.window.as_millis() as u64,
                        wait_ms = wait_for.as_millis() as u64,
                        "Global rate limit reached, waiting"
                    );
                    sleep_or_cancel(wait_for, cancel).await?;
                }
                Gate::Granted(None) => return Ok(()),
                Gate::Granted(Some(deficit)) => {
                    debug!(
                        delay_ms = deficit.as_millis() as u64,
                        "Spreading requests"
                    );
                    if let Err(e) = sleep_or_cancel(deficit, cancel).await {
                        self.forget_grant();
                        return Err(e);
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Non-blocking variant for inbound traffic: either the request fits the
    /// window now or it is rejected. No spacing is applied.
    pub fn try_acquire(&self) -> bool {
        let mut stamps = self.timestamps.lock().unwrap();
        let now = Instant::now();
        prune(&mut stamps, now, self.window);

        if stamps.len() >= self.max_requests {
            return false;
        }
        stamps.push(now);
        true
    }

    /// Grants currently inside the window.
    pub fn in_flight(&self) -> usize {
        let mut stamps = self.timestamps.lock().unwrap();
        prune(&mut stamps, Instant::now(), self.window);
        stamps.len()
    }

    fn check_and_record(&self) -> Gate {
        let mut stamps = self.timestamps.lock().unwrap();
        let now = Instant::now();
        prune(&mut stamps, now, self.window);

        if stamps.len() >= self.max_requests {
            let oldest = stamps[0];
            return Gate::Full((oldest + self.window).saturating_duration_since(now));
        }

        let deficit = stamps.last().and_then(|&previous| {
            if self.max_requests <= 1 {
                return None;
            }
            let ideal = self.window / self.max_requests as u32;
            let since = now.saturating_duration_since(previous);
            (since < ideal).then(|| ideal - since)
        });

        // Record the grant at its delivery time, i.e. after the deficit sleep.
        stamps.push(now + deficit.unwrap_or(Duration::ZERO));
        Gate::Granted(deficit)
    }

    /// Drop the most recent grant; called when its deficit sleep was cancelled
    /// and the grant was therefore never delivered.
    fn forget_grant(&self) {
        let mut stamps = self.timestamps.lock().unwrap();
        stamps.pop();
    }
}

fn prune(stamps: &mut Vec<Instant>, now: Instant, window: Duration) {
    stamps.retain(|t| now.saturating_duration_since(*t) < window);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn grants_up_to_limit_without_capacity_wait() {
        let limiter = GlobalRateLimiter::new(3, 3);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter.wait(&cancel).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn five_waits_return_at_one_second_spacing() {
        // N=3, W=3s: returns land at ~0, 1, 2, 3, 4 seconds.
        let limiter = GlobalRateLimiter::new(3, 3);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let mut offsets = Vec::new();
        for _ in 0..5 {
            limiter.wait(&cancel).await.unwrap();
            offsets.push(start.elapsed().as_millis() as u64);
        }

        let expected = [0u64, 1000, 2000, 3000, 4000];
        for (got, want) in offsets.iter().zip(expected.iter()) {
            assert!(
                got.abs_diff(*want) <= 20,
                "expected return near {want}ms, got {got}ms (all: {offsets:?})"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_more_than_max_grants_in_window() {
        let limiter = GlobalRateLimiter::new(4, 2);
        let cancel = CancellationToken::new();

        for _ in 0..10 {
            limiter.wait(&cancel).await.unwrap();
            assert!(
                limiter.in_flight() <= 4,
                "window held more than max_requests grants"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_wait_and_records_nothing() {
        let limiter = GlobalRateLimiter::new(2, 10);
        let cancel = CancellationToken::new();

        limiter.wait(&cancel).await.unwrap();
        assert_eq!(limiter.in_flight(), 1);

        // The next wait owes a 5s spacing deficit; cancel it mid-sleep.
        cancel.cancel();
        let err = limiter.wait(&cancel).await.unwrap_err();
        assert!(matches!(err, FanslyError::Cancelled));
        assert_eq!(limiter.in_flight(), 1, "cancelled wait must not leave a grant");
    }

    #[tokio::test(start_paused = true)]
    async fn try_acquire_rejects_over_limit_and_recovers() {
        let limiter = GlobalRateLimiter::new(2, 1);

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(limiter.try_acquire());
    }
}
