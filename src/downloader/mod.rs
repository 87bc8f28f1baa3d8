//! Download scheduler split into focused submodules.
//!
//! The `Downloader` struct and its methods are organized by domain:
//! - [`submit`] - Batch submission, offline dedup and duplicate collapsing
//! - [`batch`] - The result stream handed back to callers
//! - [`dispatch`] - Per-batch worker pool, item retries, cancellation
//! - [`worker`] - One item-level attempt: resolve, refresh, commit
//! - [`lifecycle`] - Shutdown and liveness

mod batch;
mod dispatch;
mod lifecycle;
mod submit;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use batch::Batch;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extractor::{ExtractorRegistry, NoopSigner, PlatformStrategy, RequestSigner};
use crate::fetcher::Fetcher;
use crate::rate_limiter::RateLimiter;
use crate::sink::ResultSink;
use crate::store::Store;
use crate::types::{BatchId, Event};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Bookkeeping for a running batch
#[derive(Clone, Debug)]
pub(crate) struct ActiveBatch {
    /// Cancels the batch (child of the downloader's shutdown token)
    pub(crate) cancel: CancellationToken,
    /// Milliseconds since `started` at the dispatch loop's last iteration
    pub(crate) heartbeat: Arc<AtomicU64>,
}

/// Batch tracking shared by submission, dispatch and liveness
#[derive(Clone)]
pub(crate) struct BatchState {
    /// Running batches
    pub(crate) active: Arc<Mutex<HashMap<BatchId, ActiveBatch>>>,
    /// Next batch id
    pub(crate) next_id: Arc<AtomicU64>,
    /// Whether new batches are accepted (cleared on shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Parent of every batch token
    pub(crate) shutdown: CancellationToken,
    /// Reference point for heartbeats
    pub(crate) started: Instant,
}

impl BatchState {
    fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
            started: Instant::now(),
        }
    }

    /// Milliseconds since the downloader was created
    pub(crate) fn now_millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Downloader {
    /// Store for dedup records, options and flags
    /// Public for embedders and integration tests to inspect records
    pub store: Arc<Store>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Platform strategies
    pub(crate) registry: Arc<ExtractorRegistry>,
    /// Staged writes and dedup records
    pub(crate) sink: ResultSink,
    /// Running batches and shutdown state
    pub(crate) batches: BatchState,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("registry", &self.registry)
            .field("active_batches", &self.batches.active_count())
            .finish()
    }
}

impl Downloader {
    /// Create a new Downloader with the built-in platform strategies
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Creates the download and staging directories
    /// - Opens (or creates) the SQLite store and runs migrations
    /// - Builds the shared rate limiter, fetcher and extractor registry
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_signer(config, Arc::new(NoopSigner)).await
    }

    /// Create a new Downloader whose metadata requests go through `signer`
    pub async fn with_signer(config: Config, signer: Arc<dyn RequestSigner>) -> Result<Self> {
        config.validate()?;

        for dir in [config.download.download_root.clone(), config.download.staging_dir()] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create directory '{}': {}", dir.display(), e),
                ))
            })?;
        }

        let store = Store::new(&config.persistence.database_path).await?;

        if store.was_unclean_shutdown().await? {
            tracing::warn!(
                "Previous session did not shut down cleanly; partial files will be resumed"
            );
        }
        store.set_clean_start().await?;

        let limiter = RateLimiter::from_config(&config.fetcher);
        let fetcher = Fetcher::new(&config.fetcher, &config.retry, limiter)?;

        let registry = ExtractorRegistry::with_defaults(fetcher.clone(), &config.platforms, signer);

        let store = Arc::new(store);
        let sink = ResultSink::new(store.clone(), fetcher, &config.download);

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        tracing::info!(
            strategies = ?registry.strategy_names(),
            concurrency = config.download.concurrency,
            requests_per_second = config.fetcher.requests_per_second,
            "Downloader initialized"
        );

        Ok(Self {
            store,
            event_tx,
            config: Arc::new(config),
            registry: Arc::new(registry),
            sink,
            batches: BatchState::new(),
        })
    }

    /// Add a platform strategy after the built-in ones
    ///
    /// Only affects batches submitted afterwards.
    pub fn register_strategy(&mut self, strategy: Arc<dyn PlatformStrategy>) {
        Arc::make_mut(&mut self.registry).register(strategy);
    }

    /// Subscribe to progress events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use douk_dl::{Config, Downloader};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = Downloader::new(Config::default()).await?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             tracing::info!(?event, "download event");
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The extractor registry batches resolve through
    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.batches.accepting_new.load(Ordering::SeqCst)
    }
}
