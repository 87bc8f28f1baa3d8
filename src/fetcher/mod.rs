//! Rate-limited HTTP fetcher
//!
//! Every outbound request (metadata API calls, short-link hops and media
//! downloads) goes through [`Fetcher`], which:
//!
//! 1. waits on the shared [`RateLimiter`] (token, connection slot, cooldown)
//! 2. classifies the response status into a [`FetchError`]
//! 3. retries transient failures with [`download_with_retry`]
//!
//! A 429 puts the whole bucket into cooldown, so every worker backs off, not
//! only the one that was throttled.

use crate::config::{FetcherConfig, RetryConfig};
use crate::error::{Error, FetchError, Result};
use crate::rate_limiter::RateLimiter;
use crate::retry::download_with_retry;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

mod download;
mod redirect;
mod stream;

pub use stream::MediaStream;

/// Per-request options
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Request the body starting at this byte offset (`Range: bytes=N-`)
    pub range_start: Option<u64>,
    /// Extra request headers (cookies, referer, signatures)
    pub headers: Vec<(String, String)>,
}

impl FetchOptions {
    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Start the body at `offset`
    pub fn range_from(mut self, offset: u64) -> Self {
        self.range_start = Some(offset);
        self
    }
}

/// HTTP client bound to the shared request budget
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    /// Same settings, but never follows redirects (short-link resolution)
    no_redirect_client: reqwest::Client,
    limiter: RateLimiter,
    retry: RetryConfig,
    config: FetcherConfig,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Fetcher {
    /// Create a fetcher that shares `limiter` with every other fetcher built from it
    pub fn new(config: &FetcherConfig, retry: &RetryConfig, limiter: RateLimiter) -> Result<Self> {
        let client = Self::build_client(config, reqwest::redirect::Policy::limited(10))?;
        let no_redirect_client = Self::build_client(config, reqwest::redirect::Policy::none())?;

        Ok(Self {
            client,
            no_redirect_client,
            limiter,
            retry: retry.clone(),
            config: config.clone(),
        })
    }

    fn build_client(
        config: &FetcherConfig,
        policy: reqwest::redirect::Policy,
    ) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.request_timeout)
            .redirect(policy);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| Error::Config {
                message: format!("invalid proxy URL {}: {}", proxy, e),
                key: Some("fetcher.proxy".to_string()),
            })?;
            builder = builder.proxy(proxy);
        }

        Ok(builder.build()?)
    }

    /// The shared request budget
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Transport-level retry settings
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Open a streaming response for `url`
    ///
    /// Transient failures are retried before the stream is handed out. The
    /// returned stream holds a connection slot until it is dropped.
    pub async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> std::result::Result<MediaStream, FetchError> {
        download_with_retry(&self.retry, || self.fetch_once(&self.client, url, options)).await
    }

    /// GET `url` and read the whole body
    ///
    /// A body cut short is retried like any other transport failure.
    pub async fn get_bytes(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> std::result::Result<Vec<u8>, FetchError> {
        download_with_retry(&self.retry, || async {
            self.fetch_once(&self.client, url, options).await?.bytes().await
        })
        .await
    }

    /// GET `url` and decode the body as JSON
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> std::result::Result<T, FetchError> {
        let body = self.get_bytes(url, options).await?;
        serde_json::from_slice::<T>(&body).map_err(|e| FetchError::InvalidBody {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Single attempt: wait for budget, send, classify
    async fn fetch_once(
        &self,
        client: &reqwest::Client,
        url: &str,
        options: &FetchOptions,
    ) -> std::result::Result<MediaStream, FetchError> {
        let permit = self.limiter.acquire().await;

        let mut request = client.get(url);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(offset) = options.range_start {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
        }

        tracing::debug!(url, range_start = ?options.range_start, "Sending request");

        let response = tokio::time::timeout(self.config.request_timeout, request.send())
            .await
            .map_err(|_| FetchError::Transport {
                url: url.to_string(),
                reason: format!("no response within {:?}", self.config.request_timeout),
            })?
            .map_err(|e| transport_error(url, &e))?;

        self.classify(url, &response)?;

        Ok(MediaStream::new(
            url.to_string(),
            response,
            permit,
            self.config.request_timeout,
        ))
    }

    /// Map a response status to a [`FetchError`], cooling the bucket down on 429
    fn classify(
        &self,
        url: &str,
        response: &reqwest::Response,
    ) -> std::result::Result<(), FetchError> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers());
            self.limiter
                .cool_down(retry_after.unwrap_or(self.config.rate_limit_cooldown));
            return Err(FetchError::RateLimited {
                url: url.to_string(),
                retry_after,
            });
        }

        classify_status(url, status)
    }
}

/// Classify a status code; 429 is handled by the caller because it has side effects
pub(crate) fn classify_status(
    url: &str,
    status: StatusCode,
) -> std::result::Result<(), FetchError> {
    if status.is_success() || status.is_redirection() {
        return Ok(());
    }

    let url = url.to_string();
    Err(match status.as_u16() {
        401 | 403 => FetchError::Forbidden {
            url,
            status: status.as_u16(),
        },
        404 | 410 => FetchError::NotFound { url },
        429 => FetchError::RateLimited {
            url,
            retry_after: None,
        },
        // 416 is only meaningful to ranged downloads, which handle it before classification
        s if status.is_server_error() || s == 408 => FetchError::Transport {
            url,
            reason: format!("HTTP {}", s),
        },
        s => FetchError::UnexpectedStatus { url, status: s },
    })
}

/// Parse `Retry-After` as delta-seconds or an HTTP date
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

pub(crate) fn transport_error(url: &str, e: &reqwest::Error) -> FetchError {
    let reason = if e.is_timeout() {
        "timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    };
    FetchError::Transport {
        url: url.to_string(),
        reason,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
