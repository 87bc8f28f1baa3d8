//! Handle returned by [`Downloader::submit`](super::Downloader::submit).

use crate::types::{BatchId, BatchSummary, ResultEvent};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// Stream of terminal [`ResultEvent`]s for one submission
///
/// Exactly one event is yielded per distinct id, in completion order. The
/// stream ends once every id has reached a terminal state.
///
/// Dropping a `Batch` does not stop the work; call [`cancel`](Self::cancel)
/// for that.
pub struct Batch {
    batch_id: BatchId,
    events: UnboundedReceiverStream<ResultEvent>,
    seen: BatchSummary,
    cancel: CancellationToken,
    handle: Option<JoinHandle<BatchSummary>>,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("batch_id", &self.batch_id)
            .field("seen", &self.seen)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Batch {
    pub(crate) fn new(
        batch_id: BatchId,
        events: UnboundedReceiverStream<ResultEvent>,
        total: usize,
        cancel: CancellationToken,
        handle: JoinHandle<BatchSummary>,
    ) -> Self {
        Self {
            batch_id,
            events,
            seen: BatchSummary {
                batch_id: Some(batch_id),
                total,
                ..BatchSummary::default()
            },
            cancel,
            handle: Some(handle),
        }
    }

    /// Id of this batch (matches the `batch_id` in broadcast events)
    pub fn id(&self) -> BatchId {
        self.batch_id
    }

    /// Stop the batch
    ///
    /// Queued items finish as `Failed` with kind `cancelled`; in-flight items
    /// stop at their next checkpoint. The stream still ends normally.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the remaining events and return the final counters
    pub async fn finish(mut self) -> BatchSummary {
        use futures::StreamExt;

        while let Some(event) = self.next().await {
            tracing::trace!(batch_id = %self.batch_id, item_id = %event.id, "Drained result");
        }

        match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::error!(batch_id = %self.batch_id, error = %e, "Batch task panicked");
                    self.seen.clone()
                }
            },
            None => self.seen.clone(),
        }
    }
}

impl Stream for Batch {
    type Item = ResultEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.events).poll_next(cx);
        if let Poll::Ready(Some(event)) = &polled {
            this.seen.record(event);
        }
        polled
    }
}
