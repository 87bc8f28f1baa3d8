//! Per-batch dispatch loop
//!
//! One task per batch owns the queue. It hands items to at most
//! `concurrency` attempt tasks, requeues retryable failures with a delay,
//! and turns cancellation and the batch deadline into terminal events.

use super::Downloader;
use super::worker::{self, AttemptContext, AttemptOutcome, AttemptReport};
use crate::error::{ErrorInfo, ErrorKind};
use crate::types::{BatchId, BatchSummary, Event, ItemId, ItemStatus, ResultEvent, WorkItem};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How often the loop wakes up when nothing else happens
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// An item waiting for its next attempt
#[derive(Debug)]
pub(crate) struct QueuedItem {
    /// Input as submitted (trimmed)
    pub(crate) raw: String,
    /// Id read from the input without network access
    pub(crate) id_hint: Option<ItemId>,
    /// Work item (its id is the raw input until resolution succeeds)
    pub(crate) item: WorkItem,
    /// Earliest start of the next attempt
    pub(crate) not_before: Instant,
}

impl QueuedItem {
    /// The item still carries the raw input as its id
    pub(crate) fn is_unresolved(&self) -> bool {
        self.id_hint.is_none() && self.item.id.as_str() == self.raw
    }
}

/// Everything `submit` prepared for the dispatch loop
pub(crate) struct BatchPlan {
    pub(crate) batch_id: BatchId,
    pub(crate) total: usize,
    pub(crate) concurrency: usize,
    pub(crate) deadline: Option<Instant>,
    pub(crate) force: bool,
    pub(crate) record: bool,
    pub(crate) cancel: CancellationToken,
    pub(crate) heartbeat: Arc<AtomicU64>,
    /// Ids identified offline; a link resolving to one of them is a duplicate
    pub(crate) known: HashSet<ItemId>,
    /// Terminal events settled during submission
    pub(crate) prepared: Vec<ResultEvent>,
    pub(crate) queued: VecDeque<QueuedItem>,
}

/// Delivers terminal events to the batch stream and subscribers
struct Results {
    batch_id: BatchId,
    summary: BatchSummary,
    tx: UnboundedSender<ResultEvent>,
}

impl Results {
    fn deliver(&mut self, downloader: &Downloader, event: ResultEvent) {
        self.summary.record(&event);
        tracing::debug!(
            batch_id = %self.batch_id,
            item_id = %event.id,
            status = %event.status,
            attempts = event.attempts,
            "Item finished"
        );
        downloader.emit_event(Event::Finished {
            batch_id: self.batch_id,
            result: event.clone(),
        });
        // Receiver may be gone; the batch keeps running regardless
        self.tx.send(event).ok();
    }
}

/// Run a batch to completion and return its final counters
pub(crate) async fn run(
    downloader: Downloader,
    plan: BatchPlan,
    tx: UnboundedSender<ResultEvent>,
) -> BatchSummary {
    let BatchPlan {
        batch_id,
        total,
        concurrency,
        deadline,
        force,
        record,
        cancel,
        heartbeat,
        known,
        prepared,
        mut queued,
    } = plan;

    let mut results = Results {
        batch_id,
        summary: BatchSummary {
            batch_id: Some(batch_id),
            total,
            ..BatchSummary::default()
        },
        tx,
    };

    for event in prepared {
        results.deliver(&downloader, event);
    }

    let ctx = Arc::new(AttemptContext {
        batch_id,
        force,
        record,
        cancel: cancel.clone(),
        live_ids: Arc::new(Mutex::new(known)),
    });

    let max_attempts = downloader.config.download.item_max_attempts;
    let mut in_flight: JoinSet<AttemptReport> = JoinSet::new();
    let mut running: HashMap<tokio::task::Id, (ItemId, u32)> = HashMap::new();
    let mut timed_out = false;

    loop {
        heartbeat.store(downloader.batches.now_millis(), Ordering::Relaxed);

        if let Some(deadline) = deadline
            && !cancel.is_cancelled()
            && Instant::now() >= deadline
        {
            tracing::warn!(batch_id = %batch_id, "Batch deadline reached, cancelling");
            timed_out = true;
            cancel.cancel();
        }

        if cancel.is_cancelled() {
            let reason = if timed_out {
                "batch deadline reached"
            } else {
                "batch cancelled"
            };
            while let Some(mut queued_item) = queued.pop_front() {
                queued_item.item.transition(ItemStatus::Failed);
                results.deliver(
                    &downloader,
                    ResultEvent::failed(
                        queued_item.item.id,
                        ErrorInfo::cancelled(reason),
                        queued_item.item.attempts,
                    ),
                );
            }
        } else {
            let now = Instant::now();
            while in_flight.len() < concurrency {
                let Some(pos) = queued.iter().position(|q| q.not_before <= now) else {
                    break;
                };
                let Some(next) = queued.remove(pos) else {
                    break;
                };
                let key = (next.item.id.clone(), next.item.attempts + 1);
                let handle =
                    in_flight.spawn(worker::attempt(downloader.clone(), ctx.clone(), next));
                running.insert(handle.id(), key);
            }
        }

        if queued.is_empty() && in_flight.is_empty() {
            break;
        }

        let mut wake = Instant::now() + HEARTBEAT_INTERVAL;
        if !cancel.is_cancelled() {
            if in_flight.len() < concurrency
                && let Some(ready) = queued.iter().map(|q| q.not_before).min()
            {
                wake = wake.min(ready);
            }
            if let Some(deadline) = deadline {
                wake = wake.min(deadline);
            }
        }

        tokio::select! {
            _ = cancel.cancelled(), if !cancel.is_cancelled() => {
                tracing::info!(batch_id = %batch_id, "Batch cancelled, draining in-flight items");
            }
            Some(joined) = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                match joined {
                    Ok((task_id, report)) => {
                        running.remove(&task_id);
                        handle_report(
                            &downloader,
                            &mut results,
                            &mut queued,
                            &cancel,
                            timed_out,
                            max_attempts,
                            report,
                        )
                        .await;
                    }
                    Err(e) => {
                        let (id, attempts) = running
                            .remove(&e.id())
                            .unwrap_or_else(|| (ItemId::new("unknown"), 0));
                        tracing::error!(
                            batch_id = %batch_id,
                            item_id = %id,
                            error = %e,
                            "Attempt task panicked"
                        );
                        results.deliver(
                            &downloader,
                            ResultEvent::failed(
                                id,
                                ErrorInfo::new(ErrorKind::Io, format!("attempt aborted: {}", e)),
                                attempts,
                            ),
                        );
                    }
                }
            }
            _ = tokio::time::sleep_until(wake) => {}
        }
    }

    results.summary.cancelled = cancel.is_cancelled();

    if let Ok(mut active) = downloader.batches.active.lock() {
        active.remove(&batch_id);
    }

    tracing::info!(
        batch_id = %batch_id,
        total = results.summary.total,
        succeeded = results.summary.succeeded,
        failed = results.summary.failed,
        skipped = results.summary.skipped,
        cancelled = results.summary.cancelled,
        "Batch finished"
    );

    downloader.emit_event(Event::BatchFinished {
        summary: results.summary.clone(),
    });

    results.summary
}

/// Turn one attempt's outcome into a terminal event or a requeue
async fn handle_report(
    downloader: &Downloader,
    results: &mut Results,
    queued: &mut VecDeque<QueuedItem>,
    cancel: &CancellationToken,
    timed_out: bool,
    max_attempts: u32,
    report: AttemptReport,
) {
    let AttemptReport {
        queued: mut entry,
        outcome,
    } = report;
    let batch_id = results.batch_id;
    let attempts = entry.item.attempts;

    match outcome {
        AttemptOutcome::Done(destination) => {
            results.deliver(
                downloader,
                ResultEvent::done(entry.item.id, destination, attempts),
            );
        }
        AttemptOutcome::Skipped(destination) => {
            let mut event = ResultEvent::skipped(entry.item.id, destination);
            event.attempts = attempts;
            results.deliver(downloader, event);
        }
        AttemptOutcome::Collapsed(into) => {
            // Another input of this batch already covers the id
            tracing::debug!(
                batch_id = %batch_id,
                input = %entry.raw,
                item_id = %into,
                "Collapsed duplicate after resolution"
            );
            results.summary.total = results.summary.total.saturating_sub(1);
        }
        AttemptOutcome::Failed(error) => {
            let retryable = error.kind.is_item_retryable();

            if retryable && attempts < max_attempts && !cancel.is_cancelled() {
                let config = &downloader.config.download;
                let delay = if error.kind == ErrorKind::RateLimited {
                    config.rate_limited_item_delay
                } else {
                    config.item_retry_delay.saturating_mul(attempts)
                };

                tracing::warn!(
                    batch_id = %batch_id,
                    item_id = %entry.item.id,
                    attempt = attempts,
                    max_attempts,
                    error = %error.message,
                    kind = %error.kind,
                    delay_ms = delay.as_millis() as u64,
                    "Item attempt failed, will retry"
                );

                downloader.emit_event(Event::Retrying {
                    batch_id,
                    id: entry.item.id.clone(),
                    attempt: attempts,
                    error: error.clone(),
                    delay_ms: delay.as_millis() as u64,
                });

                entry.item.last_error = Some(error);
                entry.not_before = Instant::now() + delay;
                queued.push_back(entry);
                return;
            }

            let stopped = retryable || error.kind == ErrorKind::Cancelled;
            let error = if cancel.is_cancelled() && stopped {
                let reason = if timed_out {
                    "batch deadline reached"
                } else {
                    "batch cancelled"
                };
                ErrorInfo::cancelled(format!("{} ({})", reason, error.message))
            } else {
                // Partial files are only worth keeping for a later resume
                if !entry.is_unresolved() {
                    downloader.sink.discard_staging(&entry.item).await;
                }
                error
            };

            tracing::warn!(
                batch_id = %batch_id,
                item_id = %entry.item.id,
                attempts,
                kind = %error.kind,
                error = %error.message,
                "Item failed"
            );

            if entry.item.transition(ItemStatus::Failed) {
                downloader.emit_event(Event::StatusChanged {
                    batch_id,
                    id: entry.item.id.clone(),
                    status: ItemStatus::Failed,
                });
            }
            entry.item.last_error = Some(error.clone());
            results.deliver(
                downloader,
                ResultEvent::failed(entry.item.id, error, attempts),
            );
        }
    }
}
