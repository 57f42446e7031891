use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ftoolbox_store::workers as registry;

/// A named periodic job. Implementations must be internally sequential; the
/// scheduler guarantees at most one execution per name is in flight.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;
    fn interval(&self) -> Duration;
    async fn run(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Registry and driver for the background workers. Each started worker gets
/// its own task: run once immediately, then on every interval tick until its
/// token is cancelled.
pub struct WorkerManager {
    pool: PgPool,
    enabled: bool,
    workers: Mutex<HashMap<&'static str, Arc<dyn Worker>>>,
    cancels: Mutex<HashMap<&'static str, CancellationToken>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<Mutex<HashSet<&'static str>>>,
}

impl WorkerManager {
    pub fn new(pool: PgPool, enabled: bool) -> Self {
        Self {
            pool,
            enabled,
            workers: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Add a worker and make sure its registry row exists. A second
    /// registration of the same name is a programmer error.
    pub async fn register(&self, worker: Arc<dyn Worker>) -> Result<()> {
        let name = worker.name();
        {
            let workers = self.workers.lock().unwrap();
            if workers.contains_key(name) {
                bail!("worker {name} already registered");
            }
        }

        registry::ensure_worker(&self.pool, name).await?;

        let mut workers = self.workers.lock().unwrap();
        if workers.insert(name, worker).is_some() {
            bail!("worker {name} already registered");
        }

        info!(worker = name, "Worker registered");
        Ok(())
    }

    /// Launch a worker's task. A worker disabled in the registry is skipped
    /// with a log line; re-enabling requires a restart.
    pub async fn start(&self, name: &str) -> Result<()> {
        if !self.enabled {
            info!(worker = name, "Workers disabled, skipping start");
            return Ok(());
        }

        let worker = {
            let workers = self.workers.lock().unwrap();
            match workers.get(name) {
                Some(worker) => Arc::clone(worker),
                None => bail!("worker {name} not found"),
            }
        };

        // Reserve the slot before the enablement check so two concurrent
        // starts cannot both launch the worker.
        let cancel = CancellationToken::new();
        {
            let mut cancels = self.cancels.lock().unwrap();
            if cancels.contains_key(worker.name()) {
                warn!(worker = name, "Worker already running");
                bail!("worker {name} already running");
            }
            cancels.insert(worker.name(), cancel.clone());
        }

        let gate = async {
            let row = registry::fetch_worker(&self.pool, name)
                .await?
                .ok_or_else(|| anyhow::anyhow!("worker {name} has no registry row"))?;
            Ok::<bool, anyhow::Error>(row.is_enabled)
        }
        .await;

        match gate {
            Ok(true) => {}
            Ok(false) => {
                self.cancels.lock().unwrap().remove(worker.name());
                info!(worker = name, "Worker is disabled");
                return Ok(());
            }
            Err(e) => {
                self.cancels.lock().unwrap().remove(worker.name());
                return Err(e);
            }
        }

        let pool = self.pool.clone();
        let running = Arc::clone(&self.running);
        let handle = tokio::spawn(async move {
            run_worker(pool, worker, cancel, running).await;
        });
        self.handles.lock().unwrap().push(handle);

        info!(worker = name, "Worker started");
        Ok(())
    }

    /// Cancel one worker's task.
    pub fn stop(&self, name: &str) -> Result<()> {
        let mut cancels = self.cancels.lock().unwrap();
        match cancels.remove(name) {
            Some(cancel) => {
                cancel.cancel();
                info!(worker = name, "Worker stopped");
                Ok(())
            }
            None => bail!("worker {name} not running"),
        }
    }

    /// Cancel every worker and wait for all in-flight executions to return.
    pub async fn stop_all(&self) {
        {
            let mut cancels = self.cancels.lock().unwrap();
            for (name, cancel) in cancels.drain() {
                cancel.cancel();
                info!(worker = name, "Worker stopped");
            }
        }

        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("All workers stopped");
    }
}

async fn run_worker(
    pool: PgPool,
    worker: Arc<dyn Worker>,
    cancel: CancellationToken,
    running: Arc<Mutex<HashSet<&'static str>>>,
) {
    // Fire immediately, then tick. Ticks that land while an execution is
    // still in progress are dropped rather than queued.
    execute_worker(&pool, worker.as_ref(), &cancel, &running).await;

    let mut ticker = tokio::time::interval(worker.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                execute_worker(&pool, worker.as_ref(), &cancel, &running).await;
            }
        }
    }
}

async fn execute_worker(
    pool: &PgPool,
    worker: &dyn Worker,
    cancel: &CancellationToken,
    running: &Mutex<HashSet<&'static str>>,
) {
    let name = worker.name();

    // Single-flight: skip the tick if a previous execution is still going.
    {
        let mut running = running.lock().unwrap();
        if !running.insert(name) {
            debug!(worker = name, "Worker already running, skipping");
            return;
        }
    }

    let outcome = execute_inner(pool, worker, cancel).await;
    running.lock().unwrap().remove(name);

    if let Err(e) = outcome {
        error!(worker = name, error = %e, "Failed to update worker status");
    }
}

async fn execute_inner(
    pool: &PgPool,
    worker: &dyn Worker,
    cancel: &CancellationToken,
) -> Result<()> {
    let name = worker.name();

    registry::mark_running(pool, name, Utc::now()).await?;

    let started = tokio::time::Instant::now();
    let result = worker.run(cancel).await;
    let duration = started.elapsed();

    // A run cut short by shutdown is a clean stop, not a failure: the row
    // returns to idle and no counters advance.
    if cancel.is_cancelled() && result.is_err() {
        info!(worker = name, "Worker run cancelled");
        registry::mark_idle(pool, name, Utc::now()).await?;
        return Ok(());
    }

    let next_run_at = Utc::now() + chrono::Duration::from_std(worker.interval())?;
    match result {
        Ok(()) => {
            info!(worker = name, duration_ms = duration.as_millis() as u64, "Worker completed");
            registry::finish_run(pool, name, next_run_at, None).await?;
        }
        Err(e) => {
            error!(
                worker = name,
                error = %e,
                duration_ms = duration.as_millis() as u64,
                "Worker failed"
            );
            registry::finish_run(pool, name, next_run_at, Some(&e.to_string())).await?;
        }
    }

    Ok(())
}
