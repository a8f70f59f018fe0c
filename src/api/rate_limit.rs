//! Fixed-window request limiter keyed by client IP.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    window_start: Instant,
}

/// Allows `limit` requests per `window` per client. A client's window opens
/// on its first request and resets once `window` has elapsed.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    buckets: DashMap<IpAddr, Bucket>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: DashMap::new(),
        }
    }

    /// Count a request from `ip`. Returns false if it exceeds the limit.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut bucket = self.buckets.entry(ip).or_insert(Bucket {
            count: 0,
            window_start: now,
        });

        if now.duration_since(bucket.window_start) >= self.window {
            *bucket = Bucket {
                count: 0,
                window_start: now,
            };
        }

        if bucket.count >= self.limit {
            return false;
        }
        bucket.count += 1;
        true
    }

    /// Drop buckets whose window has expired.
    pub fn prune(&self) {
        let now = Instant::now();
        self.buckets
            .retain(|_, b| now.duration_since(b.window_start) < self.window);
    }

    #[cfg(test)]
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}
