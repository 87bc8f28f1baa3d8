//! Manual redirect following for share short links.

use crate::error::ExtractionError;
use crate::retry::download_with_retry;
use url::Url;

use super::{FetchOptions, Fetcher};

impl Fetcher {
    /// Follow redirects from `url` one hop at a time and return the final URL
    ///
    /// Each hop is a separate budgeted request. Fails with
    /// [`ExtractionError::TooManyRedirects`] once `max_redirects` hops have
    /// been followed without reaching a non-redirect response.
    pub async fn resolve_redirects(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<String, ExtractionError> {
        let mut current = Url::parse(url).map_err(|e| ExtractionError::InvalidInput {
            input: url.to_string(),
            reason: e.to_string(),
        })?;
        let max_hops = self.config.max_redirects;
        let mut hops = 0;

        loop {
            let stream = download_with_retry(&self.retry, || {
                self.fetch_once(&self.no_redirect_client, current.as_str(), options)
            })
            .await?;

            let Some(location) = stream.location() else {
                tracing::debug!(from = url, to = %current, hops, "Short link resolved");
                return Ok(current.to_string());
            };

            if hops >= max_hops {
                return Err(ExtractionError::TooManyRedirects {
                    url: url.to_string(),
                    hops,
                });
            }

            let next = current
                .join(location)
                .map_err(|e| ExtractionError::InvalidInput {
                    input: location.to_string(),
                    reason: format!("bad redirect target: {}", e),
                })?;
            tracing::trace!(from = %current, to = %next, "Following redirect");
            current = next;
            hops += 1;
        }
    }
}
