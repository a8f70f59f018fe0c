use std::time::Duration;

use crate::error::{AppError, Result};

pub const UPSTREAM_BASE_URL: &str = "https://www.pokernow.club";

/// Path segment that precedes the game identifier in both public game URLs
/// and the upstream session endpoint.
pub const GAME_PATH_MARKER: &str = "games";

/// Retries after the first attempt. Total requests per fetch = MAX_RETRIES + 1.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Backoff factor (milliseconds). Sleep before retry n is `factor * 2^(n-1)`.
pub const DEFAULT_BACKOFF_MS: u64 = 500;

/// Per-attempt upstream timeout (seconds).
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

/// Upper bound on an upstream `Retry-After` hint (seconds).
pub const MAX_RETRY_AFTER_SECS: u64 = 30;

/// HTTP statuses that are retried: server-side failures and rate limiting.
pub const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Tracking cycle interval (seconds).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// How long stop_tracking waits for the loop to exit (seconds).
pub const DEFAULT_STOP_JOIN_TIMEOUT_SECS: u64 = 5;

/// Maximum number of points kept in every history series.
pub const DEFAULT_HISTORY_CAP: usize = 1000;

/// Requests per client IP per window on the on-demand endpoint.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;

pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Retry/timeout policy for the session fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub base_url: String,
    pub max_retries: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: UPSTREAM_BASE_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub port: u16,
    pub fetch: FetchConfig,
    pub poll_interval: Duration,
    pub stop_join_timeout: Duration,
    pub history_cap: usize,
    /// Requests allowed per client per minute on /api/get_results (RATE_LIMIT_PER_MINUTE)
    pub rate_limit_per_minute: u32,
    pub cors_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("PORT must be a valid port number".to_string()))?,
            fetch: FetchConfig {
                base_url: std::env::var("UPSTREAM_BASE_URL")
                    .map(|s| s.trim_end_matches('/').to_string())
                    .unwrap_or_else(|_| UPSTREAM_BASE_URL.to_string()),
                max_retries: env_or("FETCH_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                backoff: Duration::from_millis(env_or("FETCH_BACKOFF_MS", DEFAULT_BACKOFF_MS)),
                timeout: Duration::from_secs(env_or(
                    "FETCH_TIMEOUT_SECS",
                    DEFAULT_FETCH_TIMEOUT_SECS,
                )),
            },
            poll_interval: Duration::from_secs(env_or(
                "POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            )),
            stop_join_timeout: Duration::from_secs(env_or(
                "STOP_JOIN_TIMEOUT_SECS",
                DEFAULT_STOP_JOIN_TIMEOUT_SECS,
            )),
            history_cap: env_or("HISTORY_CAP", DEFAULT_HISTORY_CAP).max(1),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", DEFAULT_RATE_LIMIT_PER_MINUTE),
            cors_enabled: std::env::var("CORS_ENABLED")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
        })
    }
}

/// Parse an env var, falling back to `default` when unset or malformed.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
