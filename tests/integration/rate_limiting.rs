//! Rate limiter timing behavior under tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use esi_market_tools::client::rate_limit::RateLimiter;

#[tokio::test(start_paused = true)]
async fn burst_then_steady_rate() {
    let limiter = RateLimiter::new(2, 1.0);
    let start = Instant::now();

    // Two tokens are banked; the third must wait out one refill period.
    limiter.acquire().await;
    limiter.acquire().await;
    assert!(start.elapsed() < Duration::from_millis(100));

    limiter.acquire().await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "elapsed: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(1500), "elapsed: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn concurrent_waiters_each_get_their_own_token() {
    let limiter = Arc::new(RateLimiter::new(1, 10.0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            limiter.acquire().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // One banked token plus three refills at 10 tokens/s.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(280), "elapsed: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(500), "elapsed: {elapsed:?}");
}
