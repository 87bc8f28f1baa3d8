//! Streaming response body bound to a request permit.

use crate::error::FetchError;
use crate::rate_limiter::RequestPermit;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::transport_error;

/// An open response whose body has not been consumed yet
///
/// Holds its connection slot until dropped. Each chunk read is bounded by the
/// request timeout, so a stalled body surfaces as a transport error.
pub struct MediaStream {
    url: String,
    response: reqwest::Response,
    _permit: RequestPermit,
    read_timeout: Duration,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("url", &self.url)
            .field("status", &self.response.status())
            .finish()
    }
}

impl MediaStream {
    pub(crate) fn new(
        url: String,
        response: reqwest::Response,
        permit: RequestPermit,
        read_timeout: Duration,
    ) -> Self {
        Self {
            url,
            response,
            _permit: permit,
            read_timeout,
        }
    }

    /// Requested URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Response status code
    pub fn status(&self) -> u16 {
        self.response.status().as_u16()
    }

    /// Whether the server honoured a range request (206)
    pub fn is_partial(&self) -> bool {
        self.response.status() == reqwest::StatusCode::PARTIAL_CONTENT
    }

    /// Length of this response body, if announced
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Size of the complete resource, from `Content-Range` on partial replies
    pub fn total_size(&self) -> Option<u64> {
        if self.is_partial() {
            let range = self
                .response
                .headers()
                .get(reqwest::header::CONTENT_RANGE)?
                .to_str()
                .ok()?;
            range.rsplit_once('/')?.1.trim().parse().ok()
        } else {
            self.content_length()
        }
    }

    /// Response header value as text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response.headers().get(name)?.to_str().ok()
    }

    /// Redirect target, for 3xx replies
    pub fn location(&self) -> Option<&str> {
        if self.response.status().is_redirection() {
            self.header("location")
        } else {
            None
        }
    }

    /// Read the next body chunk, None at end of body
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, FetchError> {
        let chunk = tokio::time::timeout(self.read_timeout, self.response.chunk())
            .await
            .map_err(|_| FetchError::Transport {
                url: self.url.clone(),
                reason: format!("body stalled for {:?}", self.read_timeout),
            })?
            .map_err(|e| transport_error(&self.url, &e))?;

        Ok(chunk.map(|c| c.to_vec()))
    }

    /// Stream the rest of the body into `writer`, returning the bytes written
    ///
    /// `path` only labels I/O errors.
    pub async fn write_to<W>(&mut self, writer: &mut W, path: &Path) -> Result<u64, FetchError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0_u64;
        while let Some(chunk) = self.next_chunk().await? {
            writer.write_all(&chunk).await.map_err(|e| FetchError::Io {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    /// Read the whole body into memory (metadata responses only)
    pub async fn bytes(mut self) -> Result<Vec<u8>, FetchError> {
        let mut body = Vec::with_capacity(self.content_length().unwrap_or(0).min(1 << 20) as usize);
        while let Some(chunk) = self.next_chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}
