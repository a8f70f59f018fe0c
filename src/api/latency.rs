//! Upstream fetch timing, one sample per HTTP attempt (retries included).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// 1us .. 100s at 3 significant figures.
const LOWEST_US: u64 = 1;
const HIGHEST_US: u64 = 100_000_000;
const SIG_FIGS: u8 = 3;

/// Attempt durations in microseconds plus a count of attempts that did not
/// return a 2xx body. Shared by every fetcher and read by `/api/stats/latency`.
pub struct LatencyStats {
    attempts: Mutex<Histogram<u64>>,
    failed: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub failed_attempts: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

impl LatencyStats {
    pub fn new() -> Self {
        let attempts = Histogram::new_with_bounds(LOWEST_US, HIGHEST_US, SIG_FIGS)
            .expect("valid histogram bounds");
        Self {
            attempts: Mutex::new(attempts),
            failed: AtomicU64::new(0),
        }
    }

    pub fn record_attempt(&self, elapsed: Duration, succeeded: bool) {
        if !succeeded {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        if let Ok(mut h) = self.attempts.lock() {
            // Out-of-range samples land in the edge buckets.
            h.saturating_record(us.clamp(LOWEST_US, HIGHEST_US));
        }
    }

    #[cfg(test)]
    pub fn samples(&self) -> u64 {
        self.attempts.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let failed_attempts = self.failed.load(Ordering::Relaxed);
        let Ok(h) = self.attempts.lock() else {
            return LatencySnapshot {
                samples: 0,
                failed_attempts,
                p50_ms: None,
                p95_ms: None,
                p99_ms: None,
            };
        };
        let quantile_ms = |q: f64| (h.len() > 0).then(|| h.value_at_quantile(q) as f64 / 1000.0);
        LatencySnapshot {
            samples: h.len(),
            failed_attempts,
            p50_ms: quantile_ms(0.5),
            p95_ms: quantile_ms(0.95),
            p99_ms: quantile_ms(0.99),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
