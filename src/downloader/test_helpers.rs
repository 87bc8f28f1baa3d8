//! Shared test helpers for creating Downloader instances in tests.

use crate::config::{Config, FetcherConfig, PlatformConfig, RetryConfig};
use crate::downloader::Downloader;
use crate::types::Event;
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::tempdir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Video body served for every test item
pub(crate) const VIDEO: &[u8] = b"not really an mp4";

/// Config pointing both platforms at `api_base`, with fast retries and no transport retries
pub(crate) fn test_config(dir: &std::path::Path, api_base: &str) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("douk.db");
    config.download.download_root = dir.join("downloads");
    config.download.concurrency = 2;
    config.download.item_max_attempts = 3;
    config.download.item_retry_delay = Duration::from_millis(10);
    config.download.rate_limited_item_delay = Duration::from_millis(20);
    config.fetcher = FetcherConfig {
        requests_per_second: 1000,
        burst: 100,
        rate_limit_cooldown: Duration::from_millis(20),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    config.retry = RetryConfig {
        max_attempts: 0,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    config.platforms = PlatformConfig {
        douyin_api_base: api_base.to_string(),
        tiktok_api_base: api_base.to_string(),
        ..Default::default()
    };
    config
}

/// Helper to create a test Downloader whose platform APIs live on `server`.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader(server: &MockServer) -> (Downloader, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path(), &server.uri());
    let downloader = Downloader::new(config).await.unwrap();
    (downloader, temp_dir)
}

/// Douyin aweme whose video lives on `server`
pub(crate) fn aweme_on(server: &MockServer, id: &str) -> Value {
    json!({
        "aweme_id": id,
        "desc": format!("clip {id}"),
        "author": { "nickname": "someone" },
        "video": {
            "play_addr": {
                "url_list": [format!("{}/v/{id}.mp4", server.uri())],
                "data_size": VIDEO.len()
            }
        }
    })
}

/// Detail endpoint response for `id`
pub(crate) fn detail_response(server: &MockServer, id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(json!({ "status_code": 0, "aweme_detail": aweme_on(server, id) }))
}

/// Mount the detail endpoint and the video file for `id`
pub(crate) async fn mount_item(server: &MockServer, id: &str) {
    Mock::given(method("GET"))
        .and(path("/aweme/v1/web/aweme/detail/"))
        .and(query_param("aweme_id", id))
        .respond_with(detail_response(server, id))
        .mount(server)
        .await;
    mount_video(server, id).await;
}

pub(crate) async fn mount_video(server: &MockServer, id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v/{id}.mp4")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(VIDEO))
        .mount(server)
        .await;
}

/// Requests the server saw for `path`
pub(crate) async fn requests_to(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == request_path)
        .count()
}

/// Everything broadcast so far
pub(crate) fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Web link for a Douyin video id
pub(crate) fn douyin_link(id: &str) -> String {
    format!("https://www.douyin.com/video/{id}")
}
