//! Transaction issuance throttle
//!
//! Token bucket gating how fast batch sub-batch transactions are issued
//! against the store. Rate and burst are independent of sub-batch size.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Token-bucket rate limiter
#[derive(Debug)]
pub struct TokenBucket {
    /// Tokens added per second (0 = unlimited)
    rate_per_sec: f64,
    /// Bucket capacity
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket starting full with `burst` tokens, refilled at `rate_per_sec`
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate_per_sec: rate_per_sec.max(0.0),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bucket that never waits
    pub fn unlimited() -> Self {
        Self::new(0.0, 1)
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate_per_sec <= 0.0
    }

    /// Take one token if available, otherwise report how long until one is
    fn take(&self) -> Option<Duration> {
        if self.is_unlimited() {
            return None;
        }

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - state.tokens;
            Some(Duration::from_secs_f64(missing / self.rate_per_sec))
        }
    }

    /// Non-blocking acquire
    pub fn try_acquire(&self) -> bool {
        self.take().is_none()
    }

    /// Wait until a token is available, then consume it
    pub async fn acquire(&self) {
        while let Some(wait) = self.take() {
            tokio::time::sleep(wait).await;
        }
    }
}
