use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fansly_client::{AdaptiveRateLimiter, FanslyClient, GlobalRateLimiter};
use ftoolbox_common::Config;
use ftoolbox_server::{routes, AppState};
use ftoolbox_store::{heat, ranks, RateLimitPersistence};
use ftoolbox_workers::{
    CreatorUpdater, RankCalculator, StatisticsCalculator, TagCleanup, TagDiscovery, TagUpdater,
    Worker, WorkerManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    ftoolbox_common::logging::init(&config.log_level);

    info!("Starting ftoolbox");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url())
        .await
        .context("failed to connect to database")?;
    info!("Connected to database");

    ftoolbox_store::migrate(&pool).await?;
    info!("Migrations complete");

    // Backfill derived columns on a fresh or partially filled store.
    if ranks::unranked_tag_count(&pool).await? > 0 {
        info!("Calculating initial ranks for tags");
        if let Err(e) = ranks::recalculate_tag_ranks(&pool).await {
            error!(error = %e, "Failed to calculate initial tag ranks");
        }
    }
    if heat::unscored_tag_count(&pool).await? > 0 {
        info!("Calculating initial heat scores for tags");
        if let Err(e) = heat::recalculate_tag_heat(&pool).await {
            error!(error = %e, "Failed to calculate initial tag heat scores");
        }
    }
    if ranks::unranked_creator_count(&pool).await? > 0 {
        info!("Calculating initial ranks for creators");
        if let Err(e) = ranks::recalculate_creator_ranks(&pool).await {
            error!(error = %e, "Failed to calculate initial creator ranks");
        }
    }

    // Limiters first, then the client that holds them.
    let global_limiter = GlobalRateLimiter::new(
        config.fansly_global_rate_limit,
        config.fansly_global_rate_limit_window,
    );
    info!(
        max_requests = config.fansly_global_rate_limit,
        window_seconds = config.fansly_global_rate_limit_window,
        "Configured global rate limit"
    );

    let limiter = Arc::new(AdaptiveRateLimiter::new(
        config.fansly_global_rate_limit,
        global_limiter,
    ));
    limiter
        .set_persistence(Arc::new(RateLimitPersistence::new(pool.clone())))
        .await;

    let client = Arc::new(FanslyClient::new(
        Arc::clone(&limiter),
        config.fansly_auth_token.clone(),
    ));

    // Workers hold the client and the store; the manager holds the workers.
    let manager = Arc::new(WorkerManager::new(pool.clone(), config.worker_enabled));

    let creator_updater = Arc::new(CreatorUpdater::new(
        pool.clone(),
        Arc::clone(&client),
        config.update_interval(),
    ));

    let workers: Vec<Arc<dyn Worker>> = vec![
        Arc::new(TagUpdater::new(
            pool.clone(),
            Arc::clone(&client),
            config.update_interval(),
        )),
        Arc::new(TagDiscovery::new(
            pool.clone(),
            Arc::clone(&client),
            config.discovery_interval(),
        )),
        Arc::new(RankCalculator::new(pool.clone(), config.rank_interval())),
        Arc::clone(&creator_updater) as Arc<dyn Worker>,
        Arc::new(StatisticsCalculator::new(
            pool.clone(),
            config.statistics_interval(),
        )),
        Arc::new(TagCleanup::new(pool.clone(), config.cleanup_interval())),
    ];

    let worker_names: Vec<&'static str> = workers.iter().map(|w| w.name()).collect();
    for worker in workers {
        if let Err(e) = manager.register(worker).await {
            error!(error = %e, "Failed to register worker");
        }
    }

    if config.worker_enabled {
        for name in worker_names {
            if let Err(e) = manager.start(name).await {
                error!(worker = name, error = %e, "Failed to start worker");
            }
        }
    }

    // Shutdown plumbing: SIGINT/SIGTERM cancels the token; the server drains
    // first, then the workers.
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("Received shutdown signal");
            shutdown.cancel();
        }
    });

    let api_limiter = Arc::new(GlobalRateLimiter::new(
        config.api_global_rate_limit,
        config.api_global_rate_limit_window,
    ));

    let state = AppState {
        pool,
        client,
        creator_updater,
        api_limiter,
        shutdown: shutdown.clone(),
    };
    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "Server starting");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await
        .context("server error")?;

    info!("Stopping workers");
    manager.stop_all().await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
