//! Helpers shared by the unit tests: a throwaway upstream server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::config::FetchConfig;

/// Serve `router` on an ephemeral localhost port; returns its base URL.
pub async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Fast retry policy against a local upstream.
pub fn test_fetch_config(base_url: &str) -> FetchConfig {
    FetchConfig {
        base_url: base_url.to_string(),
        max_retries: 3,
        backoff: Duration::from_millis(1),
        timeout: Duration::from_secs(2),
    }
}

#[derive(Clone)]
struct Upstream {
    bodies: Arc<HashMap<String, String>>,
    hits: Arc<AtomicU32>,
}

/// Fake `players_sessions` endpoint: game id → body. Unknown ids get 404.
/// The counter tracks every request received.
pub fn sessions_upstream(games: &[(&str, &str)]) -> (Router, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let state = Upstream {
        bodies: Arc::new(
            games
                .iter()
                .map(|(id, body)| (id.to_string(), body.to_string()))
                .collect(),
        ),
        hits: hits.clone(),
    };
    let router = Router::new()
        .route("/games/:id/players_sessions", get(serve_sessions))
        .with_state(state);
    (router, hits)
}

async fn serve_sessions(State(up): State<Upstream>, Path(id): Path<String>) -> impl IntoResponse {
    up.hits.fetch_add(1, Ordering::SeqCst);
    match up.bodies.get(&id) {
        Some(body) => (StatusCode::OK, body.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
