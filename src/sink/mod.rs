//! Result sink: staged writes, verification, atomic placement
//!
//! Assets are streamed into `<staging>/<id>/`, each as a `.part` file that is
//! renamed once its size and checksum check out. Only after every asset is
//! staged (and a final cancellation checkpoint) are the files renamed into
//! `<root>/<id>/`, and only after that is the dedup record written. A crash
//! at any point therefore leaves either no record or a complete directory.

mod stage;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::DownloadConfig;
use crate::error::SinkError;
use crate::fetcher::{FetchOptions, Fetcher};
use crate::store::Store;
use crate::types::WorkItem;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Name of the metadata file written next to the assets
pub const METADATA_FILE: &str = "metadata.json";

/// Per-commit switches
#[derive(Clone, Copy, Debug, Default)]
pub struct CommitOptions {
    /// Replace an existing record instead of reporting a duplicate
    pub force: bool,
}

/// What a commit did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Files placed and recorded at this directory
    Committed(PathBuf),
    /// Another writer already completed this id; nothing was placed
    Duplicate(PathBuf),
}

impl CommitOutcome {
    /// Item directory either way
    pub fn destination(&self) -> &Path {
        match self {
            CommitOutcome::Committed(path) | CommitOutcome::Duplicate(path) => path,
        }
    }
}

/// Places resolved items on disk and records them
#[derive(Clone)]
pub struct ResultSink {
    store: Arc<Store>,
    fetcher: Fetcher,
    download_root: PathBuf,
    staging_root: PathBuf,
    write_metadata: bool,
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink")
            .field("download_root", &self.download_root)
            .field("staging_root", &self.staging_root)
            .field("write_metadata", &self.write_metadata)
            .finish()
    }
}

impl ResultSink {
    /// Create a sink writing under the configured download root
    pub fn new(store: Arc<Store>, fetcher: Fetcher, config: &DownloadConfig) -> Self {
        Self {
            store,
            fetcher,
            download_root: config.download_root.clone(),
            staging_root: config.staging_dir(),
            write_metadata: config.write_metadata,
        }
    }

    /// Final directory for `item`
    pub fn destination_for(&self, item: &WorkItem) -> PathBuf {
        self.download_root.join(item.id.as_str())
    }

    fn staging_for(&self, item: &WorkItem) -> PathBuf {
        self.staging_root.join(item.id.as_str())
    }

    /// Stage, verify, place and record every asset of `item`
    pub async fn commit(
        &self,
        item: &WorkItem,
        options: CommitOptions,
        cancel: &CancellationToken,
    ) -> Result<CommitOutcome, SinkError> {
        self.commit_with_progress(item, options, cancel, |_, _| {}).await
    }

    /// [`commit`](Self::commit), calling `on_staged(index, bytes)` as each asset is staged
    ///
    /// # Errors
    ///
    /// - [`SinkError::Cancelled`] when `cancel` fires at a checkpoint; staged
    ///   files are kept so a later attempt can resume them
    /// - [`SinkError::SizeMismatch`] / [`SinkError::ChecksumMismatch`] when a
    ///   body does not match what the platform advertised
    /// - [`SinkError::Fetch`] when an asset cannot be downloaded
    pub async fn commit_with_progress<F>(
        &self,
        item: &WorkItem,
        options: CommitOptions,
        cancel: &CancellationToken,
        on_staged: F,
    ) -> Result<CommitOutcome, SinkError>
    where
        F: Fn(usize, u64) + Send + Sync,
    {
        if !item.id.is_path_safe() {
            return Err(SinkError::Io {
                path: self.download_root.clone(),
                reason: format!("item id {:?} cannot name a directory", item.id.as_str()),
            });
        }

        // Records store milliseconds
        let now = Utc::now();
        let attempt_started =
            DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let destination = self.destination_for(item);
        let staging = self.staging_for(item);

        // Held until the record is written so a second writer sees it
        let _claim = self.store.claim(&item.id).await;

        let record = self.store.record_enabled().await?;
        if record && let Some(existing) = self.store.get_record(&item.id).await? {
            // A forced writer still yields to one that finished after it started
            let newer = existing
                .completed_at
                .is_some_and(|completed| completed >= attempt_started);
            if !options.force || newer {
                tracing::debug!(
                    item_id = %item.id,
                    forced = options.force,
                    "Item already recorded"
                );
                discard(&staging).await;
                return Ok(CommitOutcome::Duplicate(existing.destination.unwrap_or(destination)));
            }
        }

        let names = stage::file_names(&item.assets);
        stage::prepare_staging(&staging, &item.assets, &names).await?;

        for (index, (asset, name)) in item.assets.iter().zip(&names).enumerate() {
            if cancel.is_cancelled() {
                tracing::debug!(item_id = %item.id, index, "Cancelled between assets");
                return Err(SinkError::Cancelled);
            }

            let part = stage::part_path(&staging, name);
            let bytes = self
                .fetcher
                .download_to_file(&asset.url, &part, &FetchOptions::default(), asset.expected_size)
                .await?;

            stage::verify(&part, name, asset, bytes).await?;

            let staged = staging.join(name);
            tokio::fs::rename(&part, &staged)
                .await
                .map_err(|e| SinkError::io(&staged, e))?;

            tracing::debug!(
                item_id = %item.id,
                index,
                file = %name,
                bytes,
                media_type = ?asset.media_type,
                "Asset staged"
            );
            on_staged(index, bytes);
        }

        let mut files = names;
        if self.write_metadata {
            self.write_metadata_file(item, &staging, &files).await?;
            files.push(METADATA_FILE.to_string());
        }

        if cancel.is_cancelled() {
            tracing::debug!(item_id = %item.id, "Cancelled before placement");
            return Err(SinkError::Cancelled);
        }

        self.place(&staging, &destination, &files).await?;

        if record {
            if options.force {
                self.store.refresh_record(&item.id, &destination).await?;
            } else if !self.store.mark_complete(&item.id, &destination).await? {
                tracing::debug!(item_id = %item.id, "Record already present");
            }
        }

        tracing::info!(
            item_id = %item.id,
            destination = %destination.display(),
            files = files.len(),
            "Item committed"
        );

        Ok(CommitOutcome::Committed(destination))
    }

    /// Rename staged files into the destination directory
    async fn place(
        &self,
        staging: &Path,
        destination: &Path,
        files: &[String],
    ) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|e| SinkError::io(destination, e))?;

        for name in files {
            let target = destination.join(name);
            tokio::fs::rename(staging.join(name), &target)
                .await
                .map_err(|e| SinkError::io(&target, e))?;
        }

        discard(staging).await;
        Ok(())
    }

    async fn write_metadata_file(
        &self,
        item: &WorkItem,
        staging: &Path,
        files: &[String],
    ) -> Result<(), SinkError> {
        let assets: Vec<serde_json::Value> = item
            .assets
            .iter()
            .zip(files)
            .map(|(asset, file)| {
                serde_json::json!({
                    "file": file,
                    "media_type": asset.media_type,
                    "url": asset.url,
                    "generation": asset.generation,
                    "expected_size": asset.expected_size,
                })
            })
            .collect();

        let document = serde_json::json!({
            "id": item.id,
            "source_url": item.source_url,
            "platform": item.metadata.platform,
            "title": item.metadata.title,
            "author": item.metadata.author,
            "created_at": item.metadata.created_at,
            "committed_at": Utc::now(),
            "assets": assets,
        });

        let path = staging.join(METADATA_FILE);
        let bytes = serde_json::to_vec_pretty(&document).map_err(|e| SinkError::Io {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| SinkError::io(&path, e))
    }

    /// Remove staged files for an item that will not be retried
    ///
    /// Ids that cannot name a staging directory never had one and are skipped.
    pub async fn discard_staging(&self, item: &WorkItem) {
        if !item.id.is_path_safe() {
            tracing::debug!(item_id = %item.id, "No staging directory for this id");
            return;
        }
        discard(&self.staging_for(item)).await;
    }
}

async fn discard(staging: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(staging).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %staging.display(), error = %e, "Failed to remove staging directory");
    }
}
