mod aggregator;
mod api;
mod config;
mod error;
mod fetcher;
mod resolver;
mod state;
mod types;

#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::rate_limit::RateLimiter;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, RATE_LIMIT_WINDOW_SECS};
use crate::error::Result;
use crate::state::{StopOutcome, Tracker, TrackerConfig};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!(
        "Upstream {} (retries={}, backoff={:?}, timeout={:?}), poll every {:?}",
        cfg.fetch.base_url,
        cfg.fetch.max_retries,
        cfg.fetch.backoff,
        cfg.fetch.timeout,
        cfg.poll_interval,
    );

    // --- Shared state ---
    let latency = Arc::new(LatencyStats::new());
    let health = Arc::new(HealthState::new());
    let tracker = Arc::new(Tracker::new(
        TrackerConfig::from(&cfg),
        Arc::clone(&latency),
        Arc::clone(&health),
    ));
    let window = Duration::from_secs(RATE_LIMIT_WINDOW_SECS);
    let limiter = Arc::new(RateLimiter::new(cfg.rate_limit_per_minute, window));

    // Expired rate-limit buckets (background, once per window)
    let prune_limiter = Arc::clone(&limiter);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(window);
        loop {
            ticker.tick().await;
            prune_limiter.prune();
        }
    });

    // --- HTTP API server ---
    let api_state = ApiState {
        fetch: cfg.fetch.clone(),
        tracker: Arc::clone(&tracker),
        health,
        latency,
        limiter,
    };
    let app = router(api_state, cfg.cors_enabled);
    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if tracker.stop().await == StopOutcome::Stopped {
        info!("Stopped active tracking session on shutdown");
    }
    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
