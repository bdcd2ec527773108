//! Per-host request rate gating
//!
//! Institutional rate limits are expressed as requests per minute per
//! host. Every request to a host, including retries, must pass through
//! the same token bucket; hosts without a configured ceiling pass
//! straight through. Buckets live in one map behind an async mutex and
//! the lock is never held across an await.

use iiifetch_types::InstitutionPolicy;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Token bucket sized to a requests-per-minute ceiling.
///
/// Capacity equals one window's worth of requests, so a fresh bucket
/// allows a burst of up to `rpm` and then settles at the steady rate.
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .min(self.capacity);
        self.last_refill = now;
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
        }
    }
}

/// Per-host rate gates, shared by all downloads in a run
#[derive(Default)]
pub struct HostGates {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl HostGates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the host's policy admits another request.
    ///
    /// Returns the time spent waiting. Cancel-safe: the bucket map is
    /// locked only for the synchronous try/measure step, and a dropped
    /// future consumes no token.
    pub async fn acquire(&self, host: &str, policy: &InstitutionPolicy) -> Duration {
        let Some(rpm) = policy.requests_per_minute else {
            return Duration::ZERO;
        };

        let mut total_wait = Duration::ZERO;
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = match buckets.entry(host.to_string()) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => entry.insert(TokenBucket::new(rpm)),
                };
                if bucket.try_acquire() {
                    return total_wait;
                }
                bucket.time_until_available()
            };

            trace!(host, wait = ?wait, "rate limited");
            tokio::time::sleep(wait).await;
            total_wait += wait;
        }
    }
}
