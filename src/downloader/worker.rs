//! One item-level attempt: resolve, refresh stale URLs, commit

use super::Downloader;
use super::dispatch::QueuedItem;
use crate::error::{ErrorInfo, SinkError};
use crate::sink::{CommitOptions, CommitOutcome};
use crate::types::{AssetRef, BatchId, Event, ItemId, ItemStatus, MediaType, WorkItem};
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Signed URLs expiring within this window are refreshed before downloading
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Batch-wide state shared by every attempt
#[derive(Debug)]
pub(crate) struct AttemptContext {
    pub(crate) batch_id: BatchId,
    pub(crate) force: bool,
    pub(crate) record: bool,
    pub(crate) cancel: CancellationToken,
    /// Ids already owned by an item of this batch
    pub(crate) live_ids: Arc<Mutex<HashSet<ItemId>>>,
}

/// What one attempt achieved
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    /// Committed into this directory
    Done(PathBuf),
    /// A dedup record exists
    Skipped(Option<PathBuf>),
    /// Resolved to an id another input of the batch already owns
    Collapsed(ItemId),
    /// Attempt failed; the dispatcher decides whether to retry
    Failed(ErrorInfo),
}

/// The item travels back to the dispatcher with its outcome
#[derive(Debug)]
pub(crate) struct AttemptReport {
    pub(crate) queued: QueuedItem,
    pub(crate) outcome: AttemptOutcome,
}

pub(crate) async fn attempt(
    downloader: Downloader,
    ctx: Arc<AttemptContext>,
    mut queued: QueuedItem,
) -> AttemptReport {
    queued.item.attempts += 1;
    let outcome = run_attempt(&downloader, &ctx, &mut queued).await;
    AttemptReport { queued, outcome }
}

fn set_status(downloader: &Downloader, batch_id: BatchId, item: &mut WorkItem, status: ItemStatus) {
    if item.status != status && item.transition(status) {
        downloader.emit_event(Event::StatusChanged {
            batch_id,
            id: item.id.clone(),
            status,
        });
    }
}

fn cancelled() -> AttemptOutcome {
    AttemptOutcome::Failed(ErrorInfo::cancelled("stopped at checkpoint"))
}

/// Drop optional assets the configuration does not ask for
fn filter_assets(downloader: &Downloader, assets: &mut Vec<AssetRef>) {
    let config = &downloader.config.download;
    assets.retain(|asset| match asset.media_type {
        MediaType::Audio => config.download_music,
        MediaType::Cover => config.download_cover,
        MediaType::Video | MediaType::Image => true,
    });
}

async fn run_attempt(
    downloader: &Downloader,
    ctx: &AttemptContext,
    queued: &mut QueuedItem,
) -> AttemptOutcome {
    let batch_id = ctx.batch_id;
    set_status(downloader, batch_id, &mut queued.item, ItemStatus::Resolving);

    if ctx.cancel.is_cancelled() {
        return cancelled();
    }

    let resolved = tokio::select! {
        _ = ctx.cancel.cancelled() => return cancelled(),
        resolved = downloader.registry.resolve(queued.id_hint.as_ref(), &queued.raw) => resolved,
    };
    let mut resolved = match resolved {
        Ok(item) => item,
        Err(e) => {
            tracing::debug!(
                batch_id = %batch_id,
                input = %queued.raw,
                kind = %e.kind(),
                error = %e,
                "Resolution failed"
            );
            return AttemptOutcome::Failed(ErrorInfo::from(&e));
        }
    };

    if resolved.id != queued.item.id {
        let fresh = ctx
            .live_ids
            .lock()
            .map(|mut ids| ids.insert(resolved.id.clone()))
            .unwrap_or(true);
        if !fresh {
            return AttemptOutcome::Collapsed(resolved.id);
        }

        // Ids learned only now get the dedup check submission could not do
        if ctx.record && !ctx.force {
            match downloader.store.get_record(&resolved.id).await {
                Ok(Some(existing)) => {
                    queued.item.id = resolved.id;
                    set_status(downloader, batch_id, &mut queued.item, ItemStatus::Skipped);
                    return AttemptOutcome::Skipped(existing.destination);
                }
                Ok(None) => {}
                Err(e) => return AttemptOutcome::Failed(ErrorInfo::from(&e)),
            }
        }
    }

    // Keep the attempt counter and error history across re-resolution
    resolved.attempts = queued.item.attempts;
    resolved.last_error = queued.item.last_error.take();
    filter_assets(downloader, &mut resolved.assets);
    queued.item = resolved;

    downloader.emit_event(Event::StatusChanged {
        batch_id,
        id: queued.item.id.clone(),
        status: ItemStatus::Resolved,
    });

    if let Err(outcome) = refresh_expired(downloader, ctx, queued).await {
        return outcome;
    }

    if ctx.cancel.is_cancelled() {
        return cancelled();
    }

    set_status(downloader, batch_id, &mut queued.item, ItemStatus::Downloading);

    let events = downloader.event_tx.clone();
    let staged_id = queued.item.id.clone();
    let on_staged = move |index: usize, bytes: u64| {
        events
            .send(Event::AssetStaged {
                batch_id,
                id: staged_id.clone(),
                index,
                bytes,
            })
            .ok();
    };

    let committed = downloader
        .sink
        .commit_with_progress(
            &queued.item,
            CommitOptions { force: ctx.force },
            &ctx.cancel,
            on_staged,
        )
        .await;

    match committed {
        Ok(CommitOutcome::Committed(destination)) => {
            set_status(downloader, batch_id, &mut queued.item, ItemStatus::Done);
            AttemptOutcome::Done(destination)
        }
        Ok(CommitOutcome::Duplicate(destination)) => {
            set_status(downloader, batch_id, &mut queued.item, ItemStatus::Skipped);
            AttemptOutcome::Skipped(Some(destination))
        }
        Err(SinkError::Cancelled) => cancelled(),
        Err(e) => {
            tracing::debug!(
                batch_id = %batch_id,
                item_id = %queued.item.id,
                kind = %e.kind(),
                error = %e,
                "Commit failed"
            );
            AttemptOutcome::Failed(ErrorInfo::from(&e))
        }
    }
}

/// Copy fresh URLs onto `assets` by position, returning how many changed
///
/// A position whose media type differs is left alone.
pub(crate) fn refresh_assets(assets: &mut [AssetRef], fresh: &[AssetRef]) -> usize {
    let mut refreshed = 0;
    for (asset, fresh) in assets.iter_mut().zip(fresh) {
        if asset.media_type == fresh.media_type {
            asset.refresh(fresh);
            refreshed += 1;
        }
    }
    refreshed
}

/// Re-resolve while any signed asset URL is about to expire
///
/// The fresh URL replaces the old one and bumps its generation.
async fn refresh_expired(
    downloader: &Downloader,
    ctx: &AttemptContext,
    queued: &mut QueuedItem,
) -> Result<(), AttemptOutcome> {
    let batch_id = ctx.batch_id;
    let max_refreshes = downloader.config.download.max_url_refreshes;
    let mut refreshes = 0;

    while queued
        .item
        .assets
        .iter()
        .any(|a| a.is_expired(Utc::now(), EXPIRY_MARGIN))
    {
        if refreshes >= max_refreshes {
            tracing::warn!(
                batch_id = %batch_id,
                item_id = %queued.item.id,
                refreshes,
                "Asset URLs still near expiry, downloading anyway"
            );
            break;
        }
        if ctx.cancel.is_cancelled() {
            return Err(cancelled());
        }
        refreshes += 1;

        set_status(downloader, batch_id, &mut queued.item, ItemStatus::Resolving);
        let fresh = downloader
            .registry
            .resolve(Some(&queued.item.id), &queued.raw)
            .await
            .map_err(|e| AttemptOutcome::Failed(ErrorInfo::from(&e)))?;

        let mut fresh_assets = fresh.assets;
        filter_assets(downloader, &mut fresh_assets);
        let refreshed = refresh_assets(&mut queued.item.assets, &fresh_assets);

        tracing::debug!(
            batch_id = %batch_id,
            item_id = %queued.item.id,
            refresh = refreshes,
            refreshed,
            "Refreshed signed asset URLs"
        );
        set_status(downloader, batch_id, &mut queued.item, ItemStatus::Resolved);
    }

    Ok(())
}
