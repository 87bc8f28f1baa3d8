//! Shutdown coordination and liveness.

use crate::error::Result;
use crate::types::{BatchId, Event, HealthReport};
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::Downloader;

/// A batch whose dispatch loop has not ticked for this long is reported as stalled
const STALL_THRESHOLD: Duration = Duration::from_secs(30);

/// How long shutdown waits for running batches to drain
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl Downloader {
    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new batches
    /// 2. Cancels every running batch (queued items fail as cancelled,
    ///    in-flight items stop at their next checkpoint)
    /// 3. Waits for the batches to drain with a timeout (30 seconds)
    /// 4. Marks a clean shutdown in the store
    ///
    /// Partial files stay in the staging directory and are resumed by the
    /// next session.
    ///
    /// # Errors
    ///
    /// Returns an error if the clean-shutdown marker cannot be written.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new batches
        self.batches.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new batches");

        // 2. Cancel running batches (children of the shutdown token)
        self.batches.shutdown.cancel();
        tracing::info!(
            active_batches = self.batches.active_count(),
            "Signaled cancellation to all running batches"
        );

        // 3. Wait for batches to drain
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_batches()).await {
            Ok(()) => tracing::info!("All batches drained"),
            Err(_) => tracing::warn!(
                active_batches = self.batches.active_count(),
                "Timeout waiting for batches to drain, proceeding with shutdown"
            ),
        }

        // 4. Mark clean shutdown
        self.store.set_clean_shutdown().await?;
        tracing::info!("Marked clean shutdown in store");

        // 5. Emit shutdown event
        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_active_batches(&self) {
        loop {
            let active_count = self.batches.active_count();
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for batches to drain");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shutting_down(&self) -> bool {
        !self.is_accepting()
    }

    /// Liveness snapshot for a health-check wrapper
    ///
    /// Reports the store unreachable when a trivial query fails, and lists
    /// running batches whose dispatch loop has not ticked in 30 seconds.
    pub async fn liveness(&self) -> HealthReport {
        let store_reachable = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Store ping failed");
                false
            }
        };

        let now = self.batches.now_millis();
        let threshold = STALL_THRESHOLD.as_millis() as u64;
        let (active_batches, mut stalled_batches) = match self.batches.active.lock() {
            Ok(active) => {
                let stalled: Vec<BatchId> = active
                    .iter()
                    .filter(|(_, batch)| {
                        now.saturating_sub(batch.heartbeat.load(Ordering::Relaxed)) > threshold
                    })
                    .map(|(id, _)| *id)
                    .collect();
                (active.len(), stalled)
            }
            Err(_) => (0, Vec::new()),
        };
        stalled_batches.sort_by_key(|id| id.0);

        HealthReport {
            store_reachable,
            accepting: self.is_accepting(),
            active_batches,
            stalled_batches,
        }
    }
}
