use crate::config::{FetcherConfig, RetryConfig};
use crate::fetcher::Fetcher;
use crate::rate_limiter::RateLimiter;
use std::time::Duration;


/// Fetcher with fast retries and a short cooldown
pub(super) fn test_fetcher(max_attempts: u32, cooldown: Duration) -> Fetcher {
    let config = FetcherConfig {
        requests_per_second: 1000,
        burst: 100,
        rate_limit_cooldown: cooldown,
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let retry = RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    Fetcher::new(&config, &retry, RateLimiter::from_config(&config)).unwrap()
}

pub(super) async fn request_count(server: &wiremock::MockServer) -> usize {
    server.received_requests().await.unwrap().len()
}
