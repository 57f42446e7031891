//! Scheduler integration tests. Requires a Postgres instance: set
//! DATABASE_TEST_URL or these tests are skipped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use ftoolbox_store::{migrate, workers as registry};
use ftoolbox_workers::{Worker, WorkerManager};

static DB_LOCK: Mutex<()> = Mutex::const_new(());

async fn test_db() -> Option<(PgPool, MutexGuard<'static, ()>)> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let guard = DB_LOCK.lock().await;
    let pool = PgPool::connect(&url).await.ok()?;

    migrate(&pool).await.ok()?;
    sqlx::query("TRUNCATE workers").execute(&pool).await.ok()?;

    Some((pool, guard))
}

/// A worker that sleeps longer than its interval and records how many
/// executions overlap.
struct SlowWorker {
    name: &'static str,
    interval: Duration,
    run_for: Duration,
    runs: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail: bool,
}

impl SlowWorker {
    fn new(name: &'static str, interval: Duration, run_for: Duration) -> Self {
        Self {
            name,
            interval,
            run_for,
            runs: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fail: false,
        }
    }
}

#[async_trait]
impl Worker for SlowWorker {
    fn name(&self) -> &'static str {
        self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, _cancel: &CancellationToken) -> Result<()> {
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);

        tokio::time::sleep(self.run_for).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            anyhow::bail!("intentional failure");
        }
        Ok(())
    }
}

#[tokio::test]
async fn duplicate_registration_fails() {
    let Some((pool, _guard)) = test_db().await else {
        return;
    };
    let manager = WorkerManager::new(pool, true);

    let worker = Arc::new(SlowWorker::new(
        "dup-worker",
        Duration::from_secs(60),
        Duration::from_millis(1),
    ));
    manager.register(worker.clone()).await.unwrap();
    let err = manager.register(worker).await.unwrap_err();
    assert!(err.to_string().contains("already registered"));
}

#[tokio::test]
async fn registration_creates_an_idle_enabled_row() {
    let Some((pool, _guard)) = test_db().await else {
        return;
    };
    let manager = WorkerManager::new(pool.clone(), true);

    manager
        .register(Arc::new(SlowWorker::new(
            "registered-worker",
            Duration::from_secs(60),
            Duration::from_millis(1),
        )))
        .await
        .unwrap();

    let row = registry::fetch_worker(&pool, "registered-worker")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "idle");
    assert!(row.is_enabled);
    assert_eq!(row.run_count, 0);
}

#[tokio::test]
async fn starting_an_unknown_worker_fails() {
    let Some((pool, _guard)) = test_db().await else {
        return;
    };
    let manager = WorkerManager::new(pool, true);

    let err = manager.start("no-such-worker").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn disabled_worker_does_not_start() {
    let Some((pool, _guard)) = test_db().await else {
        return;
    };
    let manager = WorkerManager::new(pool.clone(), true);

    let worker = Arc::new(SlowWorker::new(
        "disabled-worker",
        Duration::from_millis(20),
        Duration::from_millis(1),
    ));
    manager.register(worker.clone()).await.unwrap();

    sqlx::query("UPDATE workers SET is_enabled = FALSE WHERE name = 'disabled-worker'")
        .execute(&pool)
        .await
        .unwrap();

    manager.start("disabled-worker").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(worker.runs.load(Ordering::SeqCst), 0);

    manager.stop_all().await;
}

#[tokio::test]
async fn executions_of_one_worker_never_overlap() {
    let Some((pool, _guard)) = test_db().await else {
        return;
    };
    let manager = WorkerManager::new(pool, true);

    // Runs take four times the interval; overlapping ticks must be skipped.
    let worker = Arc::new(SlowWorker::new(
        "slow-worker",
        Duration::from_millis(25),
        Duration::from_millis(100),
    ));
    manager.register(worker.clone()).await.unwrap();
    manager.start("slow-worker").await.unwrap();

    tokio::time::sleep(Duration::from_millis(450)).await;
    manager.stop_all().await;

    assert!(worker.runs.load(Ordering::SeqCst) >= 1);
    assert_eq!(
        worker.max_in_flight.load(Ordering::SeqCst),
        1,
        "single-flight must hold"
    );
}

#[tokio::test]
async fn run_outcomes_update_the_registry_row() {
    let Some((pool, _guard)) = test_db().await else {
        return;
    };
    let manager = WorkerManager::new(pool.clone(), true);

    let mut failing = SlowWorker::new(
        "failing-worker",
        Duration::from_secs(60),
        Duration::from_millis(1),
    );
    failing.fail = true;

    manager.register(Arc::new(failing)).await.unwrap();
    manager.start("failing-worker").await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    manager.stop_all().await;

    let row = registry::fetch_worker(&pool, "failing-worker")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.run_count, 1);
    assert_eq!(row.failure_count, 1);
    assert_eq!(row.success_count, 0);
    assert_eq!(row.last_error.as_deref(), Some("intentional failure"));
    assert!(row.next_run_at.is_some());
}

#[tokio::test]
async fn stop_all_waits_for_in_flight_runs() {
    let Some((pool, _guard)) = test_db().await else {
        return;
    };
    let manager = WorkerManager::new(pool.clone(), true);

    let worker = Arc::new(SlowWorker::new(
        "draining-worker",
        Duration::from_secs(60),
        Duration::from_millis(150),
    ));
    manager.register(worker.clone()).await.unwrap();
    manager.start("draining-worker").await.unwrap();

    // Let the first execution get going, then stop while it is mid-run.
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.stop_all().await;

    assert_eq!(
        worker.runs.load(Ordering::SeqCst),
        1,
        "stop_all must wait for the in-flight run to finish"
    );
    assert_eq!(worker.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn workers_disabled_globally_never_run() {
    let Some((pool, _guard)) = test_db().await else {
        return;
    };
    let manager = WorkerManager::new(pool, false);

    let worker = Arc::new(SlowWorker::new(
        "switched-off-worker",
        Duration::from_millis(20),
        Duration::from_millis(1),
    ));
    manager.register(worker.clone()).await.unwrap();
    manager.start("switched-off-worker").await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(worker.runs.load(Ordering::SeqCst), 0);
}
