//! Shared health state for the /api/health endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Process-level counters. Updated by the tracker, read by the API.
pub struct HealthState {
    started_at: Instant,
    /// Completed tracking cycles since process start.
    cycles_completed: AtomicU64,
    /// On-demand aggregations served since process start.
    requests_served: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub tracking_active: bool,
    pub cycles_completed: u64,
    pub requests_served: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            cycles_completed: AtomicU64::new(0),
            requests_served: AtomicU64::new(0),
        }
    }

    pub fn inc_cycles_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_served(&self) {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    pub fn report(&self, tracking_active: bool) -> HealthResponse {
        HealthResponse {
            status: "healthy",
            timestamp: Utc::now(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            tracking_active,
            cycles_completed: self.cycles_completed(),
            requests_served: self.requests_served(),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
