//! Pluggable request signing for metadata calls

use crate::error::ExtractionError;
use crate::fetcher::FetchOptions;
use async_trait::async_trait;
use url::Url;

/// A metadata request about to be sent
#[derive(Clone, Debug)]
pub struct SignableRequest {
    /// Strategy issuing the request
    pub platform: &'static str,
    /// Endpoint including query
    pub url: Url,
    /// Headers and range settings
    pub options: FetchOptions,
}

/// Adds platform signatures (query parameters or headers) to metadata requests
///
/// Signing schemes change frequently and are kept out of the engine; callers
/// plug in an implementation when their endpoints require one.
#[async_trait]
pub trait RequestSigner: Send + Sync {
    /// Return the request with whatever signature the platform expects
    ///
    /// # Errors
    ///
    /// Implementations report signing failures as
    /// [`ExtractionError::RateLimited`] when the platform refused to issue
    /// a token, or [`ExtractionError::Unsupported`] when no scheme exists
    /// for the platform.
    async fn sign(&self, request: SignableRequest) -> Result<SignableRequest, ExtractionError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Signer that leaves requests untouched
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSigner;

#[async_trait]
impl RequestSigner for NoopSigner {
    async fn sign(&self, request: SignableRequest) -> Result<SignableRequest, ExtractionError> {
        Ok(request)
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
