//! Custom test assertions for scenario tests

use douk_dl::{Batch, BatchSummary, Event, ItemStatus, ResultEvent};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;

/// Drain a batch, returning its results and final counters
///
/// Panics if the batch does not finish within `timeout`.
pub async fn run_batch(mut batch: Batch, timeout: Duration) -> (Vec<ResultEvent>, BatchSummary) {
    let results = tokio::time::timeout(timeout, async {
        let mut results = Vec::new();
        while let Some(result) = batch.next().await {
            results.push(result);
        }
        results
    })
    .await
    .unwrap_or_else(|_| panic!("batch did not finish within {timeout:?}"));

    let summary = batch.finish().await;
    (results, summary)
}

/// Find the result for `id`
pub fn result_for<'a>(results: &'a [ResultEvent], id: &str) -> &'a ResultEvent {
    results
        .iter()
        .find(|r| r.id == id)
        .unwrap_or_else(|| panic!("no result for {id} in {results:?}"))
}

/// Assert counters agree with the terminal events
pub fn assert_summary_matches(results: &[ResultEvent], summary: &BatchSummary) {
    let count = |status| results.iter().filter(|r| r.status == status).count();
    assert_eq!(summary.succeeded, count(ItemStatus::Done), "{summary:?}");
    assert_eq!(summary.failed, count(ItemStatus::Failed), "{summary:?}");
    assert_eq!(summary.skipped, count(ItemStatus::Skipped), "{summary:?}");
    assert_eq!(summary.finished(), results.len(), "{summary:?}");
}

/// Assert that a directory contains exactly the expected files
pub fn assert_files_exactly(dir: &Path, expected_files: &[&str]) {
    let mut found: Vec<String> = std::fs::read_dir(dir)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", dir.display()))
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    found.sort();
    let mut expected: Vec<String> = expected_files.iter().map(|f| f.to_string()).collect();
    expected.sort();
    assert_eq!(found, expected, "unexpected files in {}", dir.display());
}

/// Collect every event already broadcast
pub fn drain_events(events: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
