//! Request rate limiting using a token bucket algorithm
//!
//! The [`RateLimiter`] is the single budget shared by every outbound request,
//! metadata and media alike. It combines three gates:
//!
//! - a lock-free token bucket bounding requests per second (plus a burst allowance)
//! - a semaphore bounding simultaneous connections
//! - a bucket-wide cooldown ("not before" instant) applied after upstream throttling

use crate::config::FetcherConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Token granularity; one request costs `TOKEN_SCALE` units so partial refills accumulate
const TOKEN_SCALE: u64 = 1_000;

/// Longest single sleep while waiting, so rate changes are noticed promptly
const MAX_WAIT: Duration = Duration::from_millis(100);

/// Process-wide request limiter shared across all workers
///
/// Cloning is cheap and every clone shares the same bucket.
///
/// # Algorithm
///
/// - Each request consumes one token
/// - Tokens refill at `requests_per_second`
/// - The bucket holds at most `burst` tokens (minimum one), so no window of one
///   second ever admits more than `requests_per_second + burst` requests
/// - [`RateLimiter::cool_down`] empties the bucket and blocks every acquirer
///   until the cooldown instant has passed
#[derive(Clone)]
pub struct RateLimiter {
    /// Requests per second (0 = unlimited)
    rate: Arc<AtomicU64>,
    /// Bucket capacity in token units
    capacity: Arc<AtomicU64>,
    /// Available token units
    tokens: Arc<AtomicU64>,
    /// Last refill timestamp (nanoseconds since arbitrary epoch)
    last_refill: Arc<AtomicU64>,
    /// No request may start before this timestamp (nanoseconds, 0 = none)
    not_before: Arc<AtomicU64>,
    /// Simultaneous connection cap
    connections: Arc<Semaphore>,
    max_connections: usize,
}

/// Proof that a request may proceed; holds a connection slot until dropped
#[derive(Debug)]
pub struct RequestPermit {
    _connection: Option<OwnedSemaphorePermit>,
}

impl RateLimiter {
    /// Create a new RateLimiter
    ///
    /// # Arguments
    ///
    /// * `requests_per_second` - Steady request rate (None or 0 = unlimited)
    /// * `burst` - Extra requests admitted on top of the steady rate
    /// * `max_connections` - Simultaneous connection cap (at least 1)
    ///
    /// # Examples
    ///
    /// ```
    /// use douk_dl::rate_limiter::RateLimiter;
    ///
    /// // 5 req/s, bursts of 5, 8 connections
    /// let limiter = RateLimiter::new(Some(5), 5, 8);
    ///
    /// // Unlimited rate, still capped at 4 connections
    /// let unlimited = RateLimiter::new(None, 0, 4);
    /// ```
    #[must_use]
    pub fn new(requests_per_second: Option<u32>, burst: u32, max_connections: usize) -> Self {
        let rate = u64::from(requests_per_second.unwrap_or(0));
        let capacity = u64::from(burst.max(1)) * TOKEN_SCALE;
        let max_connections = max_connections.max(1);

        Self {
            rate: Arc::new(AtomicU64::new(rate)),
            capacity: Arc::new(AtomicU64::new(capacity)),
            tokens: Arc::new(AtomicU64::new(capacity)),
            last_refill: Arc::new(AtomicU64::new(Self::now_nanos())),
            not_before: Arc::new(AtomicU64::new(0)),
            connections: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Build a limiter from fetcher settings
    #[must_use]
    pub fn from_config(config: &FetcherConfig) -> Self {
        Self::new(
            Some(config.requests_per_second),
            config.burst,
            config.max_connections,
        )
    }

    /// Change the steady request rate (None = unlimited)
    pub fn set_rate(&self, requests_per_second: Option<u32>) {
        self.rate
            .store(u64::from(requests_per_second.unwrap_or(0)), Ordering::SeqCst);
    }

    /// Current steady request rate, None if unlimited
    pub fn rate(&self) -> Option<u32> {
        match self.rate.load(Ordering::Relaxed) {
            0 => None,
            r => Some(r as u32),
        }
    }

    /// Connection slots currently free
    pub fn available_connections(&self) -> usize {
        self.connections.available_permits()
    }

    /// Configured connection cap
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Wait until a request may be sent
    ///
    /// Waits out any active cooldown, takes a connection slot, then takes one
    /// token. The connection slot is released when the returned permit drops.
    pub async fn acquire(&self) -> RequestPermit {
        // The semaphore is never closed, so this only fails if that changes
        let connection = self.connections.clone().acquire_owned().await.ok();

        loop {
            if let Some(remaining) = self.cooldown_remaining() {
                tokio::time::sleep(remaining.min(MAX_WAIT)).await;
                continue;
            }

            let rate = self.rate.load(Ordering::Relaxed);
            if rate == 0 {
                break;
            }

            self.refill_tokens();

            let current = self.tokens.load(Ordering::SeqCst);
            if current >= TOKEN_SCALE {
                if self
                    .tokens
                    .compare_exchange(
                        current,
                        current - TOKEN_SCALE,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    break;
                }
                continue;
            }

            let missing = TOKEN_SCALE - current;
            let wait_ms = missing * 1000 / (rate * TOKEN_SCALE);
            let wait = Duration::from_millis(wait_ms.max(5)).min(MAX_WAIT);
            tokio::time::sleep(wait).await;
        }

        RequestPermit {
            _connection: connection,
        }
    }

    /// Put the whole bucket into cooldown for `duration`
    ///
    /// Every acquirer, including requests already waiting for a token, is held
    /// until the cooldown ends. Overlapping cooldowns keep the later deadline.
    pub fn cool_down(&self, duration: Duration) {
        let until = Self::now_nanos().saturating_add(duration.as_nanos() as u64);
        let previous = self.not_before.fetch_max(until, Ordering::SeqCst);

        self.tokens.store(0, Ordering::SeqCst);
        // Refill resumes from the end of the cooldown, not from now
        self.last_refill
            .fetch_max(until.max(previous), Ordering::SeqCst);

        tracing::warn!(
            cooldown_ms = duration.as_millis() as u64,
            "Upstream throttling, request bucket cooling down"
        );
    }

    /// Time left until the current cooldown ends, None if not cooling down
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let until = self.not_before.load(Ordering::SeqCst);
        let now = Self::now_nanos();
        (until > now).then(|| Duration::from_nanos(until - now))
    }

    /// Refill tokens based on elapsed time since last refill
    fn refill_tokens(&self) {
        let rate = self.rate.load(Ordering::Relaxed);
        if rate == 0 {
            return;
        }

        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);

        let elapsed_nanos = now.saturating_sub(last);
        let elapsed_secs = elapsed_nanos as f64 / 1_000_000_000.0;
        let tokens_to_add = (rate as f64 * TOKEN_SCALE as f64 * elapsed_secs) as u64;

        if tokens_to_add > 0
            && self
                .last_refill
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let capacity = self.capacity.load(Ordering::Relaxed);
            let _ = self
                .tokens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    Some(current.saturating_add(tokens_to_add).min(capacity))
                });
        }
    }

    /// Get current monotonic time in nanoseconds
    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rate", &self.rate())
            .field("max_connections", &self.max_connections)
            .field("cooldown_remaining", &self.cooldown_remaining())
            .finish()
    }
}
