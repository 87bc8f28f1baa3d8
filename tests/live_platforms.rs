//! Tests against the real platform APIs
//!
//! Compiled only with the `live-tests` feature and ignored by default, since
//! they depend on network access and on the platforms not changing.
//!
//! # Running the tests
//!
//! ```bash
//! DOUK_LIVE_DOUYIN_URL="https://www.douyin.com/video/..." \
//!     cargo test --features live-tests --test live_platforms -- --ignored --nocapture
//! ```
//!
//! # Environment variables
//!
//! - `DOUK_LIVE_DOUYIN_URL` - A public Douyin video link
//! - `DOUK_LIVE_TIKTOK_URL` - A public TikTok video link
//! - `DOUK_LIVE_DOUYIN_COOKIE` - Optional cookie for the Douyin web API

#![cfg(feature = "live-tests")]

mod common;

use common::run_batch;
use douk_dl::{Config, Downloader, ItemStatus, SubmitOptions};
use std::time::Duration;

async fn live_downloader(dir: &tempfile::TempDir) -> Downloader {
    let mut config = Config::default();
    config.download.download_root = dir.path().join("downloads");
    config.persistence.database_path = dir.path().join("douk.db");
    if let Ok(cookie) = std::env::var("DOUK_LIVE_DOUYIN_COOKIE") {
        config.platforms.cookies.insert("douyin".to_string(), cookie);
    }
    Downloader::new(config).await.unwrap()
}

async fn download_once(env_var: &str) {
    let Ok(link) = std::env::var(env_var) else {
        eprintln!("Skipping test: {env_var} not set");
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let downloader = live_downloader(&dir).await;

    let (results, summary) = run_batch(
        downloader.submit([link.as_str()], SubmitOptions::default()).await.unwrap(),
        Duration::from_secs(120),
    )
    .await;
    println!("{results:#?}");
    assert_eq!(summary.succeeded, 1, "{results:?}");

    // A second run only consults the store
    let (again, _) = run_batch(
        downloader.submit([link.as_str()], SubmitOptions::default()).await.unwrap(),
        Duration::from_secs(10),
    )
    .await;
    assert_eq!(again[0].status, ItemStatus::Skipped);

    downloader.shutdown().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_live_douyin_download() {
    download_once("DOUK_LIVE_DOUYIN_URL").await;
}

#[tokio::test]
#[ignore]
async fn test_live_tiktok_download() {
    download_once("DOUK_LIVE_TIKTOK_URL").await;
}
