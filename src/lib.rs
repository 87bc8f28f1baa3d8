//! # douk-dl
//!
//! Incremental download engine for Douyin and TikTok short videos and image
//! posts.
//!
//! ## Design Philosophy
//!
//! douk-dl is designed to be:
//! - **Incremental** - Every committed item is recorded, so re-submitting a
//!   list only fetches what is new
//! - **Polite** - One rate limiter shapes every request to the platforms
//! - **Crash-safe** - Files land in their final place atomically, and only
//!   then is the item recorded
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use douk_dl::{Config, Downloader, SubmitOptions};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.download.download_root = "./videos".into();
//!     config.download.download_music = true;
//!
//!     let downloader = Downloader::new(config).await?;
//!
//!     // Subscribe to progress events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let mut batch = downloader
//!         .submit(
//!             [
//!                 "7.43 复制打开抖音，看看 https://v.douyin.com/iRNBho6u/",
//!                 "https://www.tiktok.com/@someone/video/7301234567890123456",
//!             ],
//!             SubmitOptions::default(),
//!         )
//!         .await?;
//!
//!     while let Some(result) = batch.next().await {
//!         println!("{}: {:?}", result.id, result.status);
//!     }
//!
//!     downloader.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Batch scheduler (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Link parsing and platform strategies
pub mod extractor;
/// Rate-limited HTTP fetcher
pub mod fetcher;
/// Shared request rate limiter
pub mod rate_limiter;
/// Retry logic with exponential backoff
pub mod retry;
/// Staged writes and atomic placement
pub mod sink;
/// SQLite persistence for dedup records, options and flags
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, FetcherConfig, PlatformConfig, RetryConfig};
pub use downloader::{Batch, Downloader};
pub use error::{
    Error, ErrorInfo, ErrorKind, ExtractionError, FetchError, Result, SinkError, StoreError,
};
pub use extractor::{
    ExtractorRegistry, NormalizedInput, PlatformStrategy, RequestSigner, ResolvedItem,
};
pub use fetcher::{FetchOptions, Fetcher};
pub use rate_limiter::RateLimiter;
pub use sink::{CommitOptions, CommitOutcome, ResultSink};
pub use store::Store;
pub use types::{
    AssetRef, BatchId, BatchSummary, Checksum, DedupRecord, Event, HealthReport, ItemId,
    ItemMetadata, ItemStatus, MediaType, ResultEvent, SubmitOptions, WorkItem,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method,
/// which cancels running batches and marks a clean shutdown in the store.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use douk_dl::{Config, Downloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = Downloader::new(Config::default()).await?;
///
///     let worker = downloader.clone();
///     tokio::spawn(async move {
///         if let Ok(batch) = worker.submit(["7301234567890123456"], Default::default()).await {
///             let summary = batch.finish().await;
///             println!("{summary:?}");
///         }
///     });
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: Downloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM handler, waiting for SIGINT only"
            );
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGINT handler, waiting for SIGTERM only"
            );
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
