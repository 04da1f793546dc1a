//! Token-bucket rate limiting for outbound calls.
//!
//! Each namespace repository owns one limiter for its fetches and the
//! long-poll loop owns another, so a reconnect storm after a control-plane
//! outage is smoothed out instead of hitting every config service at once.
//!
//! The bucket refills continuously at `permits_per_second` and holds at most
//! one second's worth of permits (never less than one). Acquiring with a
//! timeout reserves a permit ahead of time and sleeps for the deficit, the
//! same way a bursty smooth limiter does.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct TokenBucket {
    /// May go negative while callers are waiting on reserved permits
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    permits_per_second: f64,
    capacity: f64,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    pub fn new(permits_per_second: f64) -> Self {
        let permits_per_second = if permits_per_second.is_finite() && permits_per_second > 0.0 {
            permits_per_second
        } else {
            f64::MIN_POSITIVE
        };
        let capacity = permits_per_second.max(1.0);
        Self {
            permits_per_second,
            capacity,
            bucket: Mutex::new(TokenBucket {
                tokens: 1.0,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn permits_per_second(&self) -> f64 {
        self.permits_per_second
    }

    fn refill(
        &self,
        bucket: &mut TokenBucket,
        now: Instant,
    ) {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.permits_per_second).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Takes a permit only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Waits for a permit if one will be available within `timeout`.
    ///
    /// Returns `false` immediately, without reserving anything, when the wait
    /// would exceed `timeout`.
    pub async fn acquire_timeout(
        &self,
        timeout: Duration,
    ) -> bool {
        let wait = {
            let mut bucket = self.bucket.lock();
            self.refill(&mut bucket, Instant::now());
            let deficit = 1.0 - bucket.tokens;
            let wait = if deficit <= 0.0 {
                Duration::ZERO
            } else {
                match Duration::try_from_secs_f64(deficit / self.permits_per_second) {
                    Ok(wait) => wait,
                    // a near-zero rate never refills within any timeout
                    Err(_) => return false,
                }
            };
            if wait > timeout {
                return false;
            }
            bucket.tokens -= 1.0;
            wait
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        true
    }
}
