//! # campuslink-server
//!
//! HTTP front for the campus relationship engine.
//!
//! This binary provides:
//! - **REST API** (axum) for connections, blocking, read state and the
//!   notification feed, acting on behalf of the user in `X-User-Id`
//! - **Delivery hook** through which the message transport reports inbound
//!   messages
//! - **SQLite persistence** of engine state, loaded at startup and saved
//!   periodically and on shutdown
//! - **Per-caller rate limiting** to protect against abuse

mod api;
mod config;
mod error;
mod persistence;
mod rate_limit;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use campuslink_engine::SocialEngine;
use campuslink_store::{Database, SqliteDirectory};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,campuslink_server=debug,campuslink_engine=debug")
            }),
        )
        .init();

    info!("Starting campuslink server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        http_addr = %config.http_addr,
        database = %config.database_path.display(),
        snapshot_secs = config.snapshot_interval.as_secs(),
        delivery_hook_enabled = config.internal_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Open the database and restore engine state
    // -----------------------------------------------------------------------
    let db = Arc::new(Mutex::new(Database::open_at(&config.database_path)?));
    let directory = Arc::new(SqliteDirectory::new(db.clone()));
    let engine = Arc::new(SocialEngine::new(directory.clone(), directory));

    persistence::load(&engine, &db)?;

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    let app_state = AppState {
        engine: engine.clone(),
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic snapshot
    let (snap_engine, snap_db) = (engine.clone(), db.clone());
    let snapshot_interval = config.snapshot_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(snapshot_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = persistence::save_blocking(snap_engine.clone(), snap_db.clone()).await
            {
                tracing::error!(error = %e, "Periodic snapshot failed");
            }
        }
    });

    // Idle pair locks (every minute)
    let lock_engine = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            lock_engine.purge_idle_locks();
        }
    });

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server until it fails or Ctrl+C arrives
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let served = tokio::select! {
        result = api::serve(app_state, http_addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    // -----------------------------------------------------------------------
    // 6. Final snapshot
    // -----------------------------------------------------------------------
    match persistence::save_blocking(engine, db).await {
        Ok(()) => info!("Engine state saved"),
        Err(e) => tracing::error!(error = %e, "Final snapshot failed"),
    }

    if let Err(e) = &served {
        tracing::error!(error = %e, "HTTP server failed");
    }
    served
}
