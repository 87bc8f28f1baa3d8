use crate::config::{FetcherConfig, PlatformConfig, RetryConfig};
use crate::extractor::{ExtractorRegistry, NoopSigner};
use crate::fetcher::Fetcher;
use crate::rate_limiter::RateLimiter;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

mod douyin;
mod registry;

/// Fetcher that never retries, so each mock response is observed once
pub(super) fn single_shot_fetcher() -> Fetcher {
    let config = FetcherConfig {
        requests_per_second: 1000,
        burst: 100,
        rate_limit_cooldown: Duration::from_millis(20),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let retry = RetryConfig {
        max_attempts: 0,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    Fetcher::new(&config, &retry, RateLimiter::from_config(&config)).unwrap()
}

/// Registry whose built-in strategies point at mock servers
pub(super) fn registry_for(douyin_base: &str, tiktok_base: &str) -> ExtractorRegistry {
    let platforms = PlatformConfig {
        douyin_api_base: douyin_base.to_string(),
        tiktok_api_base: tiktok_base.to_string(),
        ..Default::default()
    };
    ExtractorRegistry::with_defaults(single_shot_fetcher(), &platforms, Arc::new(NoopSigner))
}

/// Minimal video aweme object
pub(super) fn video_aweme(id: &str) -> Value {
    json!({
        "aweme_id": id,
        "desc": "a clip",
        "create_time": 1_700_000_000,
        "author": { "nickname": "someone" },
        "video": {
            "play_addr": { "url_list": [format!("https://cdn.example/{id}.mp4")], "data_size": 4096 },
            "cover": { "url_list": [format!("https://cdn.example/{id}.jpeg")] }
        },
        "music": { "play_url": { "url_list": [format!("https://cdn.example/{id}.mp3")] } }
    })
}
