//! Batch submission

use super::batch::Batch;
use super::dispatch::{self, BatchPlan, QueuedItem};
use super::{ActiveBatch, Downloader};
use crate::error::{Error, ErrorInfo, Result};
use crate::types::{BatchId, Event, ItemId, ResultEvent, SubmitOptions, WorkItem};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

impl Downloader {
    /// Submit a batch of share links, web links or bare ids
    ///
    /// Inputs whose id can be read offline are checked against the dedup
    /// store right away; ids that repeat within the batch are collapsed into
    /// one item. Everything else is resolved by the worker pool.
    ///
    /// Returns immediately with a [`Batch`] that streams one terminal
    /// [`ResultEvent`] per distinct id.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown) was called
    /// - Store errors while reading the record flag or dedup records
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use douk_dl::{Config, Downloader, SubmitOptions};
    /// use futures::StreamExt;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = Downloader::new(Config::default()).await?;
    ///     let mut batch = downloader
    ///         .submit(
    ///             ["https://www.douyin.com/video/7301234567890123456"],
    ///             SubmitOptions::default(),
    ///         )
    ///         .await?;
    ///
    ///     while let Some(result) = batch.next().await {
    ///         println!("{} -> {:?}", result.id, result.status);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn submit<I, S>(&self, inputs: I, options: SubmitOptions) -> Result<Batch>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let batch_id = BatchId(self.batches.next_id.fetch_add(1, Ordering::SeqCst));
        let concurrency = options
            .concurrency
            .unwrap_or(self.config.download.concurrency)
            .max(1);
        let timeout = options.timeout.or(self.config.download.batch_timeout);
        let record = self.store.record_enabled().await?;

        let mut seen: HashSet<ItemId> = HashSet::new();
        let mut known: HashSet<ItemId> = HashSet::new();
        let mut prepared = Vec::new();
        let mut queued = VecDeque::new();
        let now = Instant::now();

        for raw in inputs {
            let raw = raw.as_ref().trim();

            match self.registry.identify(raw) {
                Err(e) => {
                    let id = ItemId::new(raw);
                    if !seen.insert(id.clone()) {
                        continue;
                    }
                    tracing::debug!(
                        batch_id = %batch_id,
                        input = %raw,
                        error = %e,
                        "Input rejected"
                    );
                    prepared.push(ResultEvent::failed(id, ErrorInfo::from(&e), 0));
                }
                Ok(Some(id)) => {
                    if !seen.insert(id.clone()) {
                        tracing::debug!(
                            batch_id = %batch_id,
                            item_id = %id,
                            "Collapsed duplicate input"
                        );
                        continue;
                    }
                    known.insert(id.clone());

                    if record
                        && !options.force
                        && let Some(existing) = self.store.get_record(&id).await?
                    {
                        tracing::debug!(batch_id = %batch_id, item_id = %id, "Already downloaded");
                        prepared.push(ResultEvent::skipped(id, existing.destination));
                        continue;
                    }

                    queued.push_back(QueuedItem {
                        raw: raw.to_string(),
                        id_hint: Some(id.clone()),
                        item: WorkItem::new(id, raw),
                        not_before: now,
                    });
                }
                Ok(None) => {
                    // Id is only known after following the link
                    let placeholder = ItemId::new(raw);
                    if !seen.insert(placeholder.clone()) {
                        continue;
                    }
                    queued.push_back(QueuedItem {
                        raw: raw.to_string(),
                        id_hint: None,
                        item: WorkItem::new(placeholder, raw),
                        not_before: now,
                    });
                }
            }
        }

        let total = seen.len();
        let cancel = self.batches.shutdown.child_token();
        let heartbeat = Arc::new(AtomicU64::new(self.batches.now_millis()));

        if let Ok(mut active) = self.batches.active.lock() {
            active.insert(
                batch_id,
                ActiveBatch {
                    cancel: cancel.clone(),
                    heartbeat: heartbeat.clone(),
                },
            );
        }

        tracing::info!(
            batch_id = %batch_id,
            total,
            queued = queued.len(),
            settled = prepared.len(),
            concurrency,
            force = options.force,
            "Batch submitted"
        );

        self.emit_event(Event::BatchStarted {
            batch_id,
            items: total,
        });

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let plan = BatchPlan {
            batch_id,
            total,
            concurrency,
            deadline: timeout.map(|t| now + t),
            force: options.force,
            record,
            cancel: cancel.clone(),
            heartbeat,
            known,
            prepared,
            queued,
        };

        let handle = tokio::spawn(dispatch::run(self.clone(), plan, tx));

        Ok(Batch::new(
            batch_id,
            UnboundedReceiverStream::new(rx),
            total,
            cancel,
            handle,
        ))
    }
}
