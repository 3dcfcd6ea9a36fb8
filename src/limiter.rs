//! Token-bucket rate limiting.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How often `acquire` re-checks the bucket while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Token bucket with a configurable rate and burst.
///
/// A rate of zero or less disables the limiter: `acquire` returns
/// immediately and `try_acquire` always succeeds. When `burst` is zero
/// it defaults to the rate (at least one token, so fractional rates can
/// still make progress).
pub struct RateLimiter {
    inner: Mutex<Bucket>,
}

struct Bucket {
    rate: f64,
    burst: usize,
    interval: Duration,
    tokens: VecDeque<Instant>,
    last_refill: Instant,
}

impl Bucket {
    fn new(rate: f64, burst: usize) -> Self {
        let burst = if rate > 0.0 {
            if burst == 0 {
                (rate as usize).max(1)
            } else {
                burst
            }
        } else {
            0
        };
        let interval = if rate > 0.0 {
            Duration::from_nanos((1_000_000_000.0 / rate) as u64)
        } else {
            Duration::ZERO
        };
        Self {
            rate,
            burst,
            interval,
            tokens: VecDeque::new(),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        if self.rate <= 0.0 {
            return;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let mut to_add = (elapsed.as_nanos() / self.interval.as_nanos().max(1)) as u64;
        if to_add > 0 {
            while self.tokens.len() < self.burst && to_add > 0 {
                self.tokens.push_back(now);
                to_add -= 1;
            }
            self.last_refill = now;
        }
    }
}

impl RateLimiter {
    pub fn new(rate: f64, burst: usize) -> Self {
        Self {
            inner: Mutex::new(Bucket::new(rate, burst)),
        }
    }

    /// Limiter that never gates anything.
    pub fn disabled() -> Self {
        Self::new(0.0, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().expect("rate limiter mutex poisoned").rate > 0.0
    }

    /// Wait until a token is available and consume it.
    pub async fn acquire(&self) {
        loop {
            {
                let mut bucket = self.inner.lock().expect("rate limiter mutex poisoned");
                if bucket.rate <= 0.0 {
                    return;
                }
                bucket.refill();
                if bucket.tokens.pop_front().is_some() {
                    return;
                }
            }
            // lock dropped while sleeping so other waiters can progress
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Consume a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.inner.lock().expect("rate limiter mutex poisoned");
        if bucket.rate <= 0.0 {
            return true;
        }
        bucket.refill();
        bucket.tokens.pop_front().is_some()
    }

    /// Replace rate and burst. The bucket is cleared and refill restarts
    /// from now, so a rate change never releases a stale surge.
    pub fn set_rate(&self, rate: f64, burst: usize) {
        let mut bucket = self.inner.lock().expect("rate limiter mutex poisoned");
        *bucket = Bucket::new(rate, burst);
    }
}
