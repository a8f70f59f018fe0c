//! Deploy probe: `health_check [BASE_URL]`. Exits 0 when `/api/health`
//! answers with a well-formed body, 1 otherwise.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
enum CheckError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
}

fn health_url(base: &str) -> String {
    format!("{}/api/health", base.trim_end_matches('/'))
}

async fn check_health(
    client: &reqwest::Client,
    base: &str,
) -> Result<(HealthBody, Duration), CheckError> {
    let started = Instant::now();
    let resp = client.get(health_url(base)).send().await?;
    let elapsed = started.elapsed();

    if !resp.status().is_success() {
        return Err(CheckError::Status(resp.status()));
    }
    let body = resp.json::<HealthBody>().await?;
    Ok((body, elapsed))
}

#[tokio::main]
async fn main() {
    let base = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("HEALTH_CHECK_URL").ok())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            println!("Error: {e}");
            std::process::exit(1);
        }
    };

    println!("Checking health of {base}...");
    match check_health(&client, &base).await {
        Ok((body, elapsed)) => {
            println!("Status: {}", body.status);
            println!("Timestamp: {}", body.timestamp.to_rfc3339());
            println!("Response Time: {:.3}s", elapsed.as_secs_f64());
            println!("Checked at: {}", Utc::now().to_rfc3339());
        }
        Err(e) => {
            println!("Error: {e}");
            std::process::exit(1);
        }
    }
}
