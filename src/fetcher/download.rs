//! Resumable file downloads.

use crate::error::FetchError;
use crate::retry::download_with_retry;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use super::{FetchOptions, Fetcher};

impl Fetcher {
    /// Download `url` into `path`, resuming from whatever `path` already holds
    ///
    /// A non-empty file is continued with a `Range` request. When the server
    /// answers a ranged request with a full `200` body, the file is restarted
    /// from zero. A `416` on a ranged request means the file is already whole.
    /// Transient failures mid-body keep the bytes written so far and the retry
    /// resumes from there. Returns the final file length.
    pub async fn download_to_file(
        &self,
        url: &str,
        path: &Path,
        options: &FetchOptions,
        expected_size: Option<u64>,
    ) -> Result<u64, FetchError> {
        download_with_retry(&self.retry, || {
            self.download_attempt(url, path, options, expected_size)
        })
        .await
    }

    async fn download_attempt(
        &self,
        url: &str,
        path: &Path,
        options: &FetchOptions,
        expected_size: Option<u64>,
    ) -> Result<u64, FetchError> {
        let io_error = |e: std::io::Error| FetchError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let mut existing = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(io_error(e)),
        };

        if let Some(expected) = expected_size {
            if existing == expected && existing > 0 {
                tracing::debug!(url, path = %path.display(), "Partial file already complete");
                return Ok(existing);
            }
            if existing > expected {
                tracing::warn!(
                    path = %path.display(),
                    existing,
                    expected,
                    "Partial file larger than advertised size, restarting"
                );
                existing = 0;
            }
        }

        let mut request = options.clone();
        if existing > 0 {
            request.range_start = Some(existing);
        }

        let mut stream = match self.fetch_once(&self.client, url, &request).await {
            Err(FetchError::UnexpectedStatus { status: 416, .. }) if existing > 0 => {
                tracing::debug!(url, existing, "Range not satisfiable, treating file as complete");
                return Ok(existing);
            }
            other => other?,
        };

        let append = existing > 0 && stream.is_partial();
        if existing > 0 && !append {
            tracing::info!(
                url,
                discarded = existing,
                "Server ignored range request, restarting download"
            );
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .await
            .map_err(io_error)?;

        let written = stream.write_to(&mut file, path).await?;
        file.flush().await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;

        let total = if append { existing + written } else { written };
        tracing::debug!(
            url,
            path = %path.display(),
            bytes = total,
            resumed = append,
            "Download finished"
        );
        Ok(total)
    }
}
