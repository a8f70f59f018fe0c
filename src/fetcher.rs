use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::latency::LatencyStats;
use crate::config::{FetchConfig, GAME_PATH_MARKER, MAX_RETRY_AFTER_SECS, RETRYABLE_STATUSES};
use crate::types::{ErrorKind, SessionRecord};

// ---------------------------------------------------------------------------
// Game identifier extraction
// ---------------------------------------------------------------------------

/// Extract the game identifier from a public game URL: the path segment right
/// after the first `games` segment.
/// `https://www.pokernow.club/games/abc123` → `abc123`.
/// Returns None when the marker is missing, is the last segment, or is
/// followed by an empty segment. Never panics on malformed input.
pub fn extract_game_id(game_url: &str) -> Option<&str> {
    let mut segments = url_path(game_url).split('/');
    segments.find(|s| *s == GAME_PATH_MARKER)?;
    segments.next().filter(|id| !id.is_empty())
}

/// Path component of a URL, without query or fragment. Input without a
/// scheme is treated as a bare path, like `host/games/abc`; `reqwest::Url`
/// rejects that form, so the split is done by hand.
fn url_path(raw: &str) -> &str {
    let s = raw.trim();
    let s = s.split(['?', '#']).next().unwrap_or("");
    let after_authority = if let Some(idx) = s.find("://") {
        Some(&s[idx + 3..])
    } else {
        s.strip_prefix("//")
    };
    match after_authority {
        Some(rest) => rest.find('/').map(|i| &rest[i..]).unwrap_or(""),
        None => s,
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    Format(String),

    #[error("{0}")]
    Unexpected(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Timeout { .. } => ErrorKind::Timeout,
            FetchError::Network(_) => ErrorKind::NetworkError,
            FetchError::Format(_) => ErrorKind::FormatError,
            FetchError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

/// Why a single attempt failed.
enum AttemptError {
    Status {
        status: StatusCode,
        retry_after: Option<Duration>,
    },
    Transport(reqwest::Error),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Status { status, .. } => RETRYABLE_STATUSES.contains(&status.as_u16()),
            AttemptError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        }
    }

    fn into_fetch_error(self, attempts: u32, url: &str) -> FetchError {
        match self {
            AttemptError::Status { status, .. } if RETRYABLE_STATUSES.contains(&status.as_u16()) => {
                FetchError::Network(format!(
                    "Max retries exceeded for {url} (too many {status} error responses)"
                ))
            }
            AttemptError::Status { status, .. } => {
                FetchError::Network(format!("HTTP {status} for url: {url}"))
            }
            AttemptError::Transport(e) if e.is_timeout() => FetchError::Timeout { attempts },
            AttemptError::Transport(e) if e.is_builder() => FetchError::Unexpected(e.to_string()),
            AttemptError::Transport(e) => FetchError::Network(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PlayersSessionsResponse {
    /// participant id → info, in upstream key order (serde_json preserve_order).
    #[serde(rename = "playersInfos")]
    players_infos: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawPlayerInfo {
    names: Vec<String>,
    net: serde_json::Value,
}

/// Parse a `players_sessions` body into records, preserving upstream order.
pub fn parse_sessions(body: &str) -> Result<Vec<SessionRecord>, FetchError> {
    let resp: PlayersSessionsResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Format(e.to_string()))?;

    resp.players_infos
        .into_iter()
        .map(|(participant_id, value)| {
            let info: RawPlayerInfo = serde_json::from_value(value)
                .map_err(|e| FetchError::Format(format!("player {participant_id}: {e}")))?;
            Ok(SessionRecord {
                participant_id,
                display_names: info.names,
                net: info.net,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// SessionFetcher
// ---------------------------------------------------------------------------

/// Fetches per-player session data for a game from the upstream API.
/// The inner `reqwest::Client` pools connections across calls.
pub struct SessionFetcher {
    client: reqwest::Client,
    cfg: FetchConfig,
    latency: Option<Arc<LatencyStats>>,
}

impl SessionFetcher {
    pub fn new(cfg: FetchConfig) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            client,
            cfg,
            latency: None,
        })
    }

    /// Record every attempt's wall time into `stats`.
    pub fn with_latency(mut self, stats: Arc<LatencyStats>) -> Self {
        self.latency = Some(stats);
        self
    }

    pub fn endpoint(&self, game_id: &str) -> String {
        format!(
            "{}/{}/{}/players_sessions",
            self.cfg.base_url, GAME_PATH_MARKER, game_id
        )
    }

    /// Fetch and parse the session records for one game.
    /// Retries 429/5xx, timeouts and connection failures up to `max_retries`
    /// times with exponential backoff; other statuses fail immediately.
    pub async fn fetch(&self, game_id: &str) -> Result<Vec<SessionRecord>, FetchError> {
        let url = self.endpoint(game_id);
        let total_attempts = self.cfg.max_retries + 1;
        info!(game_id, "Fetching data from: {url}");

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = self.attempt_once(&url).await;
            if let Some(stats) = &self.latency {
                stats.record_attempt(started.elapsed(), result.is_ok());
            }

            let err = match result {
                Ok(body) => return parse_sessions(&body),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= total_attempts {
                return Err(err.into_fetch_error(attempt, &url));
            }

            let delay = match &err {
                AttemptError::Status {
                    retry_after: Some(d),
                    ..
                } => *d,
                _ => self.backoff_for(attempt),
            };
            match &err {
                AttemptError::Status { status, .. } => warn!(
                    game_id,
                    attempt,
                    status = status.as_u16(),
                    "Upstream returned {status}, retrying in {delay:?} ({attempt}/{total_attempts})"
                ),
                AttemptError::Transport(e) => warn!(
                    game_id,
                    attempt,
                    "Upstream request failed: {e}, retrying in {delay:?} ({attempt}/{total_attempts})"
                ),
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt_once(&self, url: &str) -> Result<String, AttemptError> {
        debug!("GET {url}");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)));
            return Err(AttemptError::Status {
                status,
                retry_after,
            });
        }

        resp.text().await.map_err(AttemptError::Transport)
    }

    /// `backoff * 2^(attempt-1)`: 0.5s, 1s, 2s with the defaults.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.cfg.backoff.saturating_mul(1u32 << exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_upstream, test_fetch_config};
    use axum::{extract::State, http::StatusCode as AxumStatus, response::IntoResponse, routing::get, Router};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn extracts_segment_after_games() {
        assert_eq!(
            extract_game_id("https://www.pokernow.club/games/abcd1234"),
            Some("abcd1234")
        );
        assert_eq!(
            extract_game_id("https://host/games/abc123/players_sessions"),
            Some("abc123")
        );
        assert_eq!(
            extract_game_id("https://host/games/abc123?tab=log#top"),
            Some("abc123")
        );
        assert_eq!(extract_game_id("host/games/xyz"), Some("xyz"));
    }

    #[test]
    fn first_marker_wins() {
        assert_eq!(extract_game_id("https://h/games/one/games/two"), Some("one"));
    }

    #[test]
    fn missing_or_trailing_marker_is_none() {
        assert_eq!(extract_game_id("https://invalid-url.com"), None);
        assert_eq!(extract_game_id("invalid-url"), None);
        assert_eq!(extract_game_id("https://h/games"), None);
        assert_eq!(extract_game_id("https://h/games/"), None);
        assert_eq!(extract_game_id(""), None);
        assert_eq!(extract_game_id("https://games/abc"), None);
        assert_eq!(extract_game_id("::::"), None);
    }

    #[test]
    fn parse_keeps_upstream_order_and_raw_net() {
        let body = r#"{"playersInfos": {
            "zz": {"names": ["Zed"], "net": "-12.25"},
            "aa": {"names": ["Amy", "amy2"], "net": 40}
        }}"#;
        let records = parse_sessions(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].participant_id, "zz");
        assert_eq!(records[0].net, serde_json::json!("-12.25"));
        assert_eq!(records[1].display_names, vec!["Amy", "amy2"]);
        assert_eq!(records[1].net, serde_json::json!(40));
    }

    #[test]
    fn malformed_bodies_are_format_errors() {
        for body in [
            "not json",
            "{}",
            r#"{"playersInfos": []}"#,
            r#"{"playersInfos": {"p1": {"net": "1"}}}"#,
            r#"{"playersInfos": {"p1": {"names": "bob", "net": "1"}}}"#,
        ] {
            let err = parse_sessions(body).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::FormatError, "body: {body}");
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let fetcher = SessionFetcher::new(FetchConfig::default()).unwrap();
        assert_eq!(fetcher.backoff_for(1), Duration::from_millis(500));
        assert_eq!(fetcher.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(fetcher.backoff_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn endpoint_follows_template() {
        let fetcher = SessionFetcher::new(FetchConfig::default()).unwrap();
        assert_eq!(
            fetcher.endpoint("abc123"),
            "https://www.pokernow.club/games/abc123/players_sessions"
        );
    }

    fn status_router(status: AxumStatus, hits: Arc<AtomicU32>) -> Router {
        Router::new()
            .route(
                "/games/:id/players_sessions",
                get(move |State(hits): State<Arc<AtomicU32>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    status.into_response()
                }),
            )
            .with_state(hits)
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surface_as_network() {
        let hits = Arc::new(AtomicU32::new(0));
        let base = spawn_upstream(status_router(AxumStatus::SERVICE_UNAVAILABLE, hits.clone())).await;
        let fetcher = SessionFetcher::new(test_fetch_config(&base)).unwrap();

        let err = fetcher.fetch("g1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert_eq!(hits.load(Ordering::SeqCst), 4, "initial attempt + 3 retries");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let base = spawn_upstream(status_router(AxumStatus::NOT_FOUND, hits.clone())).await;
        let fetcher = SessionFetcher::new(test_fetch_config(&base)).unwrap();

        let err = fetcher.fetch("g1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert!(err.to_string().contains("404"), "{err}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeouts_are_retried_then_surface_as_timeout() {
        let hits = Arc::new(AtomicU32::new(0));
        let router = Router::new()
            .route(
                "/games/:id/players_sessions",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    "{}"
                }),
            )
            .with_state(hits.clone());
        let base = spawn_upstream(router).await;
        let mut cfg = test_fetch_config(&base);
        cfg.timeout = Duration::from_millis(50);
        let fetcher = SessionFetcher::new(cfg).unwrap();

        let err = fetcher.fetch("g1").await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { attempts: 4 }), "{err:?}");
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let hits = Arc::new(AtomicU32::new(0));
        let latency = Arc::new(LatencyStats::new());
        let router = Router::new()
            .route(
                "/games/:id/players_sessions",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        AxumStatus::BAD_GATEWAY.into_response()
                    } else {
                        r#"{"playersInfos": {"p1": {"names": ["al"], "net": "50.5"}}}"#
                            .into_response()
                    }
                }),
            )
            .with_state(hits.clone());
        let base = spawn_upstream(router).await;
        let fetcher = SessionFetcher::new(test_fetch_config(&base))
            .unwrap()
            .with_latency(latency.clone());

        let records = fetcher.fetch("abc123").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].display_names, vec!["al"]);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(latency.samples(), 3);
        assert_eq!(latency.snapshot().failed_attempts, 2);
    }

    #[tokio::test]
    async fn retry_after_header_is_honoured() {
        let hits = Arc::new(AtomicU32::new(0));
        let router = Router::new()
            .route(
                "/games/:id/players_sessions",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (AxumStatus::TOO_MANY_REQUESTS, [("retry-after", "0")]).into_response()
                    } else {
                        r#"{"playersInfos": {}}"#.into_response()
                    }
                }),
            )
            .with_state(hits.clone());
        let base = spawn_upstream(router).await;
        let mut cfg = test_fetch_config(&base);
        // A computed backoff this long would blow the test's time budget.
        cfg.backoff = Duration::from_secs(60);
        let fetcher = SessionFetcher::new(cfg).unwrap();

        let records = tokio::time::timeout(Duration::from_secs(5), fetcher.fetch("g1"))
            .await
            .expect("Retry-After: 0 should skip the backoff")
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
