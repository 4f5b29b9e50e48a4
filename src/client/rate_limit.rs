//! Token-bucket rate limiting for outbound ESI requests.
//!
//! The bucket refills continuously at `tokens_per_second` up to
//! `burst_size`, so short bursts go through at full speed and sustained
//! traffic settles at the steady rate.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::trace;

/// Default bucket capacity.
pub const DEFAULT_BURST_SIZE: u32 = 10;

/// Default steady-state refill rate.
pub const DEFAULT_TOKENS_PER_SECOND: f64 = 5.0;

/// Async token-bucket rate limiter.
///
/// Every outbound request acquires exactly one token. `acquire` suspends
/// the calling task until a token is available; it never fails. Waiters
/// are serialized by the internal mutex, which is held across the refill
/// sleep so concurrent callers cannot double-spend the same token.
#[derive(Debug)]
pub struct RateLimiter {
    burst_size: f64,
    tokens_per_second: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, burst_size: f64, tokens_per_second: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * tokens_per_second).min(burst_size);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// Create a rate limiter with the given bucket capacity and refill rate.
    ///
    /// The bucket starts full, so the first `burst_size` acquisitions are
    /// immediate.
    ///
    /// # Arguments
    ///
    /// * `burst_size` - Maximum tokens the bucket can hold
    /// * `tokens_per_second` - Steady-state refill rate
    pub fn new(burst_size: u32, tokens_per_second: f64) -> Self {
        Self {
            burst_size: f64::from(burst_size),
            tokens_per_second,
            state: Mutex::new(BucketState {
                tokens: f64::from(burst_size),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Acquire one token, sleeping until the bucket refills if necessary.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        state.refill(self.burst_size, self.tokens_per_second);

        while state.tokens < 1.0 {
            let wait = (1.0 - state.tokens) / self.tokens_per_second;
            trace!(wait_seconds = wait, "rate limit reached, waiting for refill");
            sleep(Duration::from_secs_f64(wait)).await;
            state.refill(self.burst_size, self.tokens_per_second);
        }

        state.tokens -= 1.0;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_BURST_SIZE, DEFAULT_TOKENS_PER_SECOND)
    }
}
