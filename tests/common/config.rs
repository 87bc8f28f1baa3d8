//! Test configuration helpers for creating downloaders against a mock platform

use std::time::Duration;
use tempfile::TempDir;
use douk_dl::config::{FetcherConfig, PersistenceConfig, PlatformConfig, RetryConfig};
use douk_dl::{Config, Downloader};

/// Config pointing both platform APIs at `api_base`
///
/// Transport retries are off and item retries are fast, so each mock
/// response maps to one observable attempt.
pub fn mock_config(dir: &TempDir, api_base: &str) -> Config {
    let mut config = Config::default();
    config.download.download_root = dir.path().join("downloads");
    config.download.concurrency = 4;
    config.download.item_retry_delay = Duration::from_millis(10);
    config.download.rate_limited_item_delay = Duration::from_millis(20);
    config.fetcher = FetcherConfig {
        requests_per_second: 1000,
        burst: 100,
        rate_limit_cooldown: Duration::from_millis(50),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    config.retry = RetryConfig {
        max_attempts: 0,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.platforms = PlatformConfig {
        douyin_api_base: api_base.to_string(),
        tiktok_api_base: api_base.to_string(),
        ..Default::default()
    };
    config.persistence = PersistenceConfig {
        database_path: dir.path().join("douk.db"),
    };
    config
}

/// Create a downloader from `config`
///
/// Returns the downloader; the caller keeps `dir` alive.
pub async fn create_downloader(config: Config) -> Downloader {
    Downloader::new(config)
        .await
        .unwrap_or_else(|e| panic!("failed to create downloader: {e}"))
}

/// Create a downloader against `api_base` with [`mock_config`]
/// Returns the downloader and the tempdir (which must be kept alive).
pub async fn create_mock_downloader(api_base: &str) -> (Downloader, TempDir) {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let downloader = create_downloader(mock_config(&dir, api_base)).await;
    (downloader, dir)
}
