use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{sleep_or_cancel, GlobalRateLimiter};
use crate::error::FanslyError;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Rate-limit headers the upstream may use to announce its actual limit.
const LIMIT_HEADERS: [&str; 3] = ["x-ratelimit-limit", "x-rate-limit-limit", "ratelimit-limit"];

/// Durable snapshot of one endpoint's learned configuration. The live
/// sliding-window timestamps and backoff deadline are deliberately absent:
/// a restarted process starts with a clean window and no backoff.
#[derive(Debug, Clone)]
pub struct PersistedEndpoint {
    pub endpoint: String,
    pub limit: i32,
    pub window_seconds: i64,
    pub success_streak: i32,
    pub rate_limit_hits: i32,
    pub backoff_multiplier: f64,
    pub last_rate_limit_hit: Option<DateTime<Utc>>,
}

/// Load/save pair for learned endpoint configurations. The database
/// implementation lives with the store; tests may supply an in-memory one.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<Vec<PersistedEndpoint>>;
    async fn save(&self, endpoints: &[PersistedEndpoint]) -> anyhow::Result<()>;
}

struct EndpointState {
    limit: usize,
    window: Duration,
    success_streak: u32,
    rate_limit_hits: u32,
    backoff_multiplier: f64,
    current_backoff: Duration,
    backoff_until: Option<Instant>,
    last_rate_limit_hit: Option<DateTime<Utc>>,
    timestamps: Vec<Instant>,
}

/// Per-endpoint limiter that learns the upstream's real limits: 429s shrink
/// the limit and raise an exponential backoff, long success streaks grow it
/// back, and advertised limit headers are adopted at 90%.
pub struct AdaptiveRateLimiter {
    endpoints: Mutex<HashMap<String, EndpointState>>,
    global: GlobalRateLimiter,
    default_limit: usize,
    store: Mutex<Option<Arc<dyn RateLimitStore>>>,
}

enum Gate {
    Backoff(Duration),
    AtLimit(Duration),
    Granted,
}

impl AdaptiveRateLimiter {
    pub fn new(default_limit: usize, global: GlobalRateLimiter) -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
            global,
            default_limit: default_limit.max(1),
            store: Mutex::new(None),
        }
    }

    pub fn global(&self) -> &GlobalRateLimiter {
        &self.global
    }

    /// Attach persistence and load previously learned configurations.
    /// Loaded entries start with no live backoff.
    pub async fn set_persistence(&self, store: Arc<dyn RateLimitStore>) {
        let loaded = store.load().await;
        *self.store.lock().unwrap() = Some(store);

        match loaded {
            Ok(persisted) => {
                let count = persisted.len();
                let mut endpoints = self.endpoints.lock().unwrap();
                for p in persisted {
                    endpoints.insert(
                        p.endpoint.clone(),
                        EndpointState {
                            limit: (p.limit.max(1)) as usize,
                            window: Duration::from_secs(p.window_seconds.max(1) as u64),
                            success_streak: p.success_streak.max(0) as u32,
                            rate_limit_hits: p.rate_limit_hits.max(0) as u32,
                            backoff_multiplier: p.backoff_multiplier,
                            current_backoff: Duration::ZERO,
                            backoff_until: None,
                            last_rate_limit_hit: p.last_rate_limit_hit,
                            timestamps: Vec::new(),
                        },
                    );
                }
                info!(endpoints = count, "Loaded rate limit configurations");
            }
            Err(e) => {
                warn!(error = %e, "Failed to load rate limit configurations");
            }
        }
    }

    /// Block until a request to `endpoint` can go out: global limiter first,
    /// then any active backoff, then the endpoint's own sliding window.
    pub async fn wait_if_needed(
        &self,
        cancel: &CancellationToken,
        endpoint: &str,
    ) -> Result<(), FanslyError> {
        self.global.wait(cancel).await?;

        loop {
            let gate = {
                let mut endpoints = self.endpoints.lock().unwrap();
                let state = self.get_or_create(&mut endpoints, endpoint);
                let now = Instant::now();
                prune(&mut state.timestamps, now, state.window);

                if let Some(until) = state.backoff_until {
                    if until > now {
                        Gate::Backoff(until - now)
                    } else {
                        state.backoff_until = None;
                        continue_gate(state, now)
                    }
                } else {
                    continue_gate(state, now)
                }
            };

            match gate {
                Gate::Backoff(wait_for) => {
                    info!(
                        endpoint,
                        wait_ms = wait_for.as_millis() as u64,
                        "In backoff period, waiting"
                    );
                    sleep_or_cancel(wait_for, cancel).await?;
                }
                Gate::AtLimit(wait_for) => {
                    info!(
                        endpoint,
                        wait_ms = wait_for.as_millis() as u64,
                        "At endpoint rate limit, waiting"
                    );
                    sleep_or_cancel(wait_for, cancel).await?;
                }
                Gate::Granted => return Ok(()),
            }
        }
    }

    /// Feed a response back so the limiter can learn from it.
    pub async fn handle_response(&self, endpoint: &str, status: u16, headers: &HeaderMap) {
        let should_persist = {
            let mut endpoints = self.endpoints.lock().unwrap();
            let state = self.get_or_create(&mut endpoints, endpoint);

            if status == 429 {
                state.last_rate_limit_hit = Some(Utc::now());
                state.rate_limit_hits += 1;
                state.success_streak = 0;

                let grown = state.current_backoff.mul_f64(state.backoff_multiplier);
                state.current_backoff = grown.clamp(MIN_BACKOFF, MAX_BACKOFF);

                // An explicit Retry-After overrides the computed backoff.
                if let Some(seconds) = header_u64(headers, RETRY_AFTER.as_str()) {
                    state.current_backoff = Duration::from_secs(seconds);
                }

                state.backoff_until = Some(Instant::now() + state.current_backoff);
                state.limit = ((state.limit as f64 * 0.8).floor() as usize).max(1);

                warn!(
                    endpoint,
                    new_limit = state.limit,
                    backoff_ms = state.current_backoff.as_millis() as u64,
                    total_hits = state.rate_limit_hits,
                    "Rate limit hit, adjusting"
                );
                true
            } else {
                state.success_streak += 1;

                if state.success_streak > 10 {
                    state.current_backoff = Duration::ZERO;
                    state.backoff_until = None;
                }

                let mut persist = false;

                // Adopt an advertised limit at 90% of its value.
                if let Some(advertised) = LIMIT_HEADERS
                    .iter()
                    .find_map(|&h| header_u64(headers, h))
                    .filter(|v| *v > 0)
                {
                    let adopted = ((advertised as f64 * 0.9).floor() as usize).max(1);
                    if advertised as usize != state.limit {
                        info!(
                            endpoint,
                            old_limit = state.limit,
                            new_limit = adopted,
                            "Discovered actual rate limit from headers"
                        );
                        state.limit = adopted;
                        persist = true;
                    }
                }

                // A long clean streak earns a 10% bump, once per streak.
                if state.success_streak > 100 && state.rate_limit_hits == 0 {
                    state.limit = ((state.limit as f64 * 1.1).floor() as usize).max(1);
                    info!(
                        endpoint,
                        new_limit = state.limit,
                        streak = state.success_streak,
                        "Increasing rate limit after success streak"
                    );
                    state.success_streak = 0;
                    persist = true;
                }

                persist
            }
        };

        if should_persist {
            self.persist().await;
        }
    }

    /// Snapshot of every endpoint's durable state.
    pub fn snapshot(&self) -> Vec<PersistedEndpoint> {
        let endpoints = self.endpoints.lock().unwrap();
        endpoints
            .iter()
            .map(|(endpoint, state)| PersistedEndpoint {
                endpoint: endpoint.clone(),
                limit: state.limit as i32,
                window_seconds: state.window.as_secs() as i64,
                success_streak: state.success_streak as i32,
                rate_limit_hits: state.rate_limit_hits as i32,
                backoff_multiplier: state.backoff_multiplier,
                last_rate_limit_hit: state.last_rate_limit_hit,
            })
            .collect()
    }

    fn get_or_create<'a>(
        &self,
        endpoints: &'a mut HashMap<String, EndpointState>,
        endpoint: &str,
    ) -> &'a mut EndpointState {
        endpoints.entry(endpoint.to_string()).or_insert_with(|| {
            debug!(endpoint, default_limit = self.default_limit, "Creating new endpoint config");
            EndpointState {
                limit: self.default_limit,
                window: DEFAULT_WINDOW,
                success_streak: 0,
                rate_limit_hits: 0,
                backoff_multiplier: BACKOFF_MULTIPLIER,
                current_backoff: Duration::ZERO,
                backoff_until: None,
                last_rate_limit_hit: None,
                timestamps: Vec::new(),
            }
        })
    }

    async fn persist(&self) {
        let store = self.store.lock().unwrap().clone();
        let Some(store) = store else {
            return;
        };
        let snapshot = self.snapshot();
        if let Err(e) = store.save(&snapshot).await {
            warn!(error = %e, "Failed to persist rate limit configurations");
        }
    }

    #[cfg(test)]
    fn with_state<T>(&self, endpoint: &str, f: impl FnOnce(&EndpointState) -> T) -> Option<T> {
        let endpoints = self.endpoints.lock().unwrap();
        endpoints.get(endpoint).map(f)
    }
}

fn continue_gate(state: &mut EndpointState, now: Instant) -> Gate {
    if state.timestamps.len() >= state.limit {
        let oldest = state.timestamps[0];
        return Gate::AtLimit((oldest + state.window).saturating_duration_since(now));
    }
    state.timestamps.push(now);
    Gate::Granted
}

fn prune(stamps: &mut Vec<Instant>, now: Instant, window: Duration) {
    stamps.retain(|t| now.saturating_duration_since(*t) < window);
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    const ENDPOINT: &str = "GET /contentdiscovery/media/tag";

    fn limiter(default_limit: usize) -> AdaptiveRateLimiter {
        AdaptiveRateLimiter::new(default_limit, GlobalRateLimiter::new(1000, 1))
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                reqwest::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hit_starts_backoff_at_minimum_and_doubles() {
        let limiter = limiter(50);

        limiter.handle_response(ENDPOINT, 429, &headers(&[])).await;
        let backoff = limiter
            .with_state(ENDPOINT, |s| s.current_backoff)
            .unwrap();
        assert_eq!(backoff, Duration::from_secs(1));

        limiter.handle_response(ENDPOINT, 429, &headers(&[])).await;
        let backoff = limiter
            .with_state(ENDPOINT, |s| s.current_backoff)
            .unwrap();
        assert_eq!(backoff, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_header_overrides_backoff_exactly() {
        let limiter = limiter(50);

        limiter
            .handle_response(ENDPOINT, 429, &headers(&[("retry-after", "7")]))
            .await;

        let backoff = limiter
            .with_state(ENDPOINT, |s| s.current_backoff)
            .unwrap();
        assert_eq!(backoff, Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hit_shrinks_limit_twenty_percent() {
        let limiter = limiter(50);

        limiter.handle_response(ENDPOINT, 429, &headers(&[])).await;
        assert_eq!(limiter.with_state(ENDPOINT, |s| s.limit).unwrap(), 40);

        limiter.handle_response(ENDPOINT, 429, &headers(&[])).await;
        assert_eq!(limiter.with_state(ENDPOINT, |s| s.limit).unwrap(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn limit_never_shrinks_below_one() {
        let limiter = limiter(1);

        for _ in 0..5 {
            limiter.handle_response(ENDPOINT, 429, &headers(&[])).await;
        }
        assert_eq!(limiter.with_state(ENDPOINT, |s| s.limit).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_streak_clears_backoff() {
        let limiter = limiter(50);

        limiter.handle_response(ENDPOINT, 429, &headers(&[])).await;
        assert!(limiter.with_state(ENDPOINT, |s| s.current_backoff).unwrap() > Duration::ZERO);

        for _ in 0..11 {
            limiter.handle_response(ENDPOINT, 200, &headers(&[])).await;
        }
        assert_eq!(
            limiter.with_state(ENDPOINT, |s| s.current_backoff).unwrap(),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hundred_and_one_successes_grow_limit_exactly_once() {
        let limiter = limiter(50);

        for _ in 0..101 {
            limiter.handle_response(ENDPOINT, 200, &headers(&[])).await;
        }

        // One 10% step, streak reset so the growth does not compound.
        assert_eq!(limiter.with_state(ENDPOINT, |s| s.limit).unwrap(), 55);
        assert_eq!(limiter.with_state(ENDPOINT, |s| s.success_streak).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_growth_after_any_rate_limit_hit() {
        let limiter = limiter(50);

        limiter.handle_response(ENDPOINT, 429, &headers(&[])).await;
        for _ in 0..150 {
            limiter.handle_response(ENDPOINT, 200, &headers(&[])).await;
        }

        // 50 -> 40 on the hit, and it stays there.
        assert_eq!(limiter.with_state(ENDPOINT, |s| s.limit).unwrap(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn advertised_limit_adopted_at_ninety_percent() {
        let limiter = limiter(50);

        limiter
            .handle_response(ENDPOINT, 200, &headers(&[("ratelimit-limit", "100")]))
            .await;

        assert_eq!(limiter.with_state(ENDPOINT, |s| s.limit).unwrap(), 90);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_if_needed_sleeps_out_active_backoff() {
        let limiter = limiter(50);
        let cancel = CancellationToken::new();

        limiter
            .handle_response(ENDPOINT, 429, &headers(&[("retry-after", "3")]))
            .await;

        let start = Instant::now();
        limiter.wait_if_needed(&cancel, ENDPOINT).await.unwrap();
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_secs(3),
            "expected >= 3s backoff wait, got {waited:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_if_needed_enforces_endpoint_window() {
        let limiter = limiter(2);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        limiter.wait_if_needed(&cancel, ENDPOINT).await.unwrap();
        limiter.wait_if_needed(&cancel, ENDPOINT).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));

        // Third grant must wait out the 60s endpoint window.
        limiter.wait_if_needed(&cancel, ENDPOINT).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(59));
    }

    struct MemoryStore {
        saved: Mutex<Vec<PersistedEndpoint>>,
    }

    #[async_trait]
    impl RateLimitStore for MemoryStore {
        async fn load(&self) -> anyhow::Result<Vec<PersistedEndpoint>> {
            Ok(self.saved.lock().unwrap().clone())
        }

        async fn save(&self, endpoints: &[PersistedEndpoint]) -> anyhow::Result<()> {
            *self.saved.lock().unwrap() = endpoints.to_vec();
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_round_trip_resets_live_backoff() {
        let store = Arc::new(MemoryStore {
            saved: Mutex::new(Vec::new()),
        });

        let first = limiter(50);
        first.set_persistence(store.clone()).await;
        first.handle_response(ENDPOINT, 429, &headers(&[])).await;

        let saved = store.saved.lock().unwrap().clone();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].limit, 40);
        assert_eq!(saved[0].rate_limit_hits, 1);
        assert!(saved[0].last_rate_limit_hit.is_some());

        // A fresh limiter loads the learned limit but starts without backoff.
        let second = limiter(50);
        second.set_persistence(store).await;
        assert_eq!(second.with_state(ENDPOINT, |s| s.limit).unwrap(), 40);
        assert_eq!(
            second.with_state(ENDPOINT, |s| s.current_backoff).unwrap(),
            Duration::ZERO
        );
    }
}
