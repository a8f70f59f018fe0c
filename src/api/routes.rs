use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::aggregator::aggregate_all;
use crate::api::health::{HealthResponse, HealthState};
use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::api::rate_limit::RateLimiter;
use crate::api::validate::{validate_request, validate_tracking_request, AggregationRequest};
use crate::config::FetchConfig;
use crate::error::{AppError, Result};
use crate::fetcher::SessionFetcher;
use crate::state::tracker::TrackingSnapshot;
use crate::state::{StartOutcome, Tracker};
use crate::types::ResultBundle;

#[derive(Clone)]
pub struct ApiState {
    pub fetch: FetchConfig,
    pub tracker: Arc<Tracker>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub limiter: Arc<RateLimiter>,
}

pub fn router(state: ApiState, cors_enabled: bool) -> Router {
    let app = Router::new()
        .route("/api/get_results", post(get_results_on_demand))
        .route("/start_tracking", post(start_tracking))
        .route("/stop_tracking", post(stop_tracking))
        .route("/get_results", get(get_tracking_results))
        .route("/api/health", get(get_health))
        .route("/api/stats/latency", get(get_stats_latency))
        .with_state(state);

    if cors_enabled {
        use tower_http::cors::{Any, CorsLayer};
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app.layer(cors)
    } else {
        app
    }
}

/// Lenient body parse: anything that is not JSON counts as "no data" and is
/// reported by validation.
fn parse_body(body: &Bytes) -> Option<Value> {
    serde_json::from_slice(body).ok()
}

// ---------------------------------------------------------------------------
// On-demand aggregation
// ---------------------------------------------------------------------------

async fn get_results_on_demand(
    State(state): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    if !state.limiter.check(addr.ip()) {
        warn!(client = %addr.ip(), "Rate limit exceeded");
        return AppError::RateLimited.into_response();
    }

    let request = match validate_request(parse_body(&body).as_ref()) {
        Ok(r) => r,
        Err(e) => {
            warn!("Rejected request: {e}");
            return e.into_response();
        }
    };

    match run_on_demand(&state, request).await {
        Ok(bundle) => {
            state.health.inc_requests_served();
            Json(json!({ "error": null, "results": bundle })).into_response()
        }
        Err(e) => {
            error!("On-demand aggregation failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": e.to_string(),
                    "results": { "total_profit": 0, "results": {}, "has_errors": true }
                })),
            )
                .into_response()
        }
    }
}

/// One cycle with a fetcher scoped to this request.
async fn run_on_demand(state: &ApiState, request: AggregationRequest) -> Result<ResultBundle> {
    let fetcher = SessionFetcher::new(state.fetch.clone())?.with_latency(Arc::clone(&state.latency));
    info!(
        player = %request.identity.primary_name,
        aliases = request.identity.aliases.len(),
        games = request.games.len(),
        "Processing results request"
    );
    Ok(aggregate_all(&fetcher, &request.games, &request.identity).await)
}

// ---------------------------------------------------------------------------
// Polling tracker
// ---------------------------------------------------------------------------

async fn start_tracking(
    State(state): State<ApiState>,
    body: Bytes,
) -> std::result::Result<Json<Value>, AppError> {
    let request = validate_tracking_request(parse_body(&body).as_ref())?;
    let message = match state.tracker.start(request.identity, request.games).await? {
        StartOutcome::Started => "Tracking started",
        StartOutcome::AlreadyActive => "Tracking already active",
    };
    Ok(Json(json!({ "message": message })))
}

async fn stop_tracking(State(state): State<ApiState>) -> Json<Value> {
    state.tracker.stop().await;
    Json(json!({ "message": "Tracking stopped" }))
}

async fn get_tracking_results(State(state): State<ApiState>) -> Json<TrackingSnapshot> {
    Json(state.tracker.snapshot().await)
}

// ---------------------------------------------------------------------------
// Ops
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let tracking_active = state.tracker.is_running();
    Json(state.health.report(tracking_active))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TrackerConfig;
    use crate::test_support::{sessions_upstream, spawn_upstream, test_fetch_config};
    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    const GAME_A: &str = r#"{"playersInfos": {"p1": {"names": ["Alice"], "net": "20"}}}"#;
    const GAME_B: &str = r#"{"playersInfos": {"p1": {"names": ["al"], "net": -5.25}}}"#;

    fn app_with(base: &str, rate_limit: u32) -> Router {
        let latency = Arc::new(LatencyStats::new());
        let health = Arc::new(HealthState::new());
        let fetch = test_fetch_config(base);
        let tracker = Arc::new(Tracker::new(
            TrackerConfig {
                fetch: fetch.clone(),
                poll_interval: Duration::from_secs(60),
                stop_join_timeout: Duration::from_secs(5),
                history_cap: 100,
            },
            Arc::clone(&latency),
            Arc::clone(&health),
        ));
        let state = ApiState {
            fetch,
            tracker,
            health,
            latency,
            limiter: Arc::new(RateLimiter::new(rate_limit, Duration::from_secs(60))),
        };
        router(state, true).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn request_body() -> Value {
        json!({
            "playerName": "Alice",
            "aliases": ["AL"],
            "games": [
                {"url": "https://www.pokernow.club/games/a", "isInCents": false},
                {"url": "https://www.pokernow.club/games/b", "isInCents": true}
            ]
        })
    }

    async fn upstream() -> String {
        let (router, _) = sessions_upstream(&[("a", GAME_A), ("b", GAME_B)]);
        spawn_upstream(router).await
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let app = app_with("http://127.0.0.1:9", 60);
        let (status, body) = send(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["tracking_active"], false);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn on_demand_aggregates_all_games() {
        let app = app_with(&upstream().await, 60);
        let (status, body) = send(&app, "POST", "/api/get_results", Some(request_body())).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].is_null());
        let results = &body["results"];
        assert_eq!(results["total_profit"].as_f64(), Some(14.75));
        assert_eq!(results["has_errors"], false);
        assert_eq!(
            results["results"]["https://www.pokernow.club/games/a"].as_f64(),
            Some(20.0)
        );

        let (_, latency) = send(&app, "GET", "/api/stats/latency", None).await;
        assert_eq!(latency["samples"], 2);
    }

    #[tokio::test]
    async fn on_demand_reports_failures_as_error_strings() {
        let app = app_with(&upstream().await, 60);
        let body = json!({
            "playerName": "Alice",
            "games": [
                {"url": "https://www.pokernow.club/games/a", "isInCents": false},
                {"url": "https://www.pokernow.club/lobby", "isInCents": false}
            ]
        });
        let (status, body) = send(&app, "POST", "/api/get_results", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"]["has_errors"], true);
        assert_eq!(body["results"]["total_profit"].as_f64(), Some(20.0));
        assert_eq!(
            body["results"]["results"]["https://www.pokernow.club/lobby"],
            "ERROR: Invalid game URL format"
        );
    }

    #[tokio::test]
    async fn validation_errors_are_400_with_message() {
        let app = app_with("http://127.0.0.1:9", 60);

        let (status, body) = send(&app, "POST", "/api/get_results", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No data provided");

        let (status, body) = send(
            &app,
            "POST",
            "/api/get_results",
            Some(json!({"playerName": "P", "games": [{"invalid": "format"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Each game must have a url and isInCents field");
    }

    #[tokio::test]
    async fn rate_limit_applies_before_validation() {
        let app = app_with("http://127.0.0.1:9", 3);
        for _ in 0..3 {
            let (status, _) = send(&app, "POST", "/api/get_results", None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        let (status, body) = send(&app, "POST", "/api/get_results", None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Rate limit exceeded. Please wait a minute.");

        // Other routes are not limited.
        let (status, _) = send(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn tracking_start_get_stop_flow() {
        let app = app_with(&upstream().await, 60);

        let (status, body) = send(&app, "POST", "/start_tracking", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing game URLs or player name");

        let (status, body) = send(&app, "POST", "/start_tracking", Some(request_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Tracking started");

        let (_, body) = send(&app, "POST", "/start_tracking", Some(request_body())).await;
        assert_eq!(body["message"], "Tracking already active");

        let mut snapshot = Value::Null;
        for _ in 0..200 {
            let (_, body) = send(&app, "GET", "/get_results", None).await;
            if !body["last_scrape_time"].is_null() {
                snapshot = body;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(snapshot["tracking_active"], true);
        let tracking = &snapshot["tracking_results"];
        assert_eq!(tracking["total_profit"].as_f64(), Some(14.75));
        assert_eq!(tracking["history"]["timestamps"].as_array().unwrap().len(), 1);
        assert!(snapshot["time_since_scrape_seconds"].is_number());

        let (_, health) = send(&app, "GET", "/api/health", None).await;
        assert_eq!(health["tracking_active"], true);

        let (status, body) = send(&app, "POST", "/stop_tracking", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Tracking stopped");

        let (_, body) = send(&app, "GET", "/get_results", None).await;
        assert_eq!(body["tracking_active"], false);
        assert_eq!(body["tracking_results"]["total_profit"].as_f64(), Some(14.75));
    }

    #[tokio::test]
    async fn results_before_any_tracking_are_empty() {
        let app = app_with("http://127.0.0.1:9", 60);
        let (status, body) = send(&app, "GET", "/get_results", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tracking_active"], false);
        assert!(body["last_scrape_time"].is_null());
        assert!(body["time_since_scrape_seconds"].is_null());
        assert_eq!(body["tracking_results"]["results"], json!({}));
    }
}
