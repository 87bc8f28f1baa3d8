use crate::config::{DownloadConfig, FetcherConfig, RetryConfig};
use crate::error::{FetchError, SinkError};
use crate::fetcher::Fetcher;
use crate::rate_limiter::RateLimiter;
use crate::sink::{CommitOptions, CommitOutcome, METADATA_FILE, ResultSink};
use crate::store::{Store, flags};
use crate::types::{AssetRef, Checksum, ItemId, ItemStatus, MediaType, WorkItem};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VIDEO: &[u8] = b"0123456789abcdef";
const MUSIC: &[u8] = b"la la la";

struct Harness {
    _dir: TempDir,
    root: std::path::PathBuf,
    store: Arc<Store>,
    sink: ResultSink,
}

async fn harness(write_metadata: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("downloads");
    let store = Arc::new(Store::new(&dir.path().join("douk.db")).await.unwrap());

    let fetcher_config = FetcherConfig {
        requests_per_second: 1000,
        burst: 100,
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
    let limiter = RateLimiter::from_config(&fetcher_config);
    let fetcher = Fetcher::new(&fetcher_config, &retry, limiter).unwrap();

    let config = DownloadConfig {
        download_root: root.clone(),
        write_metadata,
        ..Default::default()
    };
    let sink = ResultSink::new(store.clone(), fetcher, &config);

    Harness {
        _dir: dir,
        root,
        store,
        sink,
    }
}

async fn serve_assets(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v/7301.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(VIDEO))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/m/7301.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(MUSIC))
        .mount(server)
        .await;
}

fn resolved_item(server: &MockServer) -> WorkItem {
    let mut item = WorkItem::new(ItemId::from("7301"), "https://www.douyin.com/video/7301");
    item.transition(ItemStatus::Resolving);
    item.transition(ItemStatus::Resolved);
    item.assets = vec![
        AssetRef::new(format!("{}/v/7301.mp4", server.uri()), MediaType::Video)
            .with_size(Some(VIDEO.len() as u64)),
        AssetRef::new(format!("{}/m/7301.mp3", server.uri()), MediaType::Audio),
    ];
    item.metadata.platform = "douyin".to_string();
    item.metadata.title = Some("a clip".to_string());
    item
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap().len()
}

mod recovery;
