//! Bulk export of prospects into a remote campaign.
//!
//! A run validates every item locally, drops duplicates (within the batch and
//! against one remote lookup), then submits the rest concurrently. Each
//! submission is retried on its own task, and one item's failure never aborts
//! the others. Outcomes are folded into a single [`ExportResult`] sequentially on
//! the calling task, so the progress callback never runs concurrently and
//! always sees non-decreasing counts.

use crate::classifier::RawFailure;
use crate::errors::AppError;
use crate::models::{normalize_identity, ExportItem, ExportResult, ExportStatus};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::validation::validate_item;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives a snapshot after every item reaches a terminal outcome.
pub type ProgressCallback = Arc<dyn Fn(&ExportResult) + Send + Sync>;

/// Local pre-submission check; an `Err` marks the item failed without a network call.
pub type ItemValidator = Arc<dyn Fn(&ExportItem) -> Result<(), AppError> + Send + Sync>;

/// Remote side of an export.
pub trait ExportSink: Send + Sync {
    /// Returns the subset of `identities` already present remotely.
    fn existing_identities<'a>(
        &'a self,
        identities: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<String>, RawFailure>>;

    /// Submits one item.
    fn submit<'a>(&'a self, item: &'a ExportItem) -> BoxFuture<'a, Result<(), RawFailure>>;
}

/// Per-run knobs for [`BulkExportPipeline::submit_batch`].
#[derive(Clone)]
pub struct ExportOptions {
    pub progress: Option<ProgressCallback>,
    pub validator: Option<ItemValidator>,
    pub check_duplicates: bool,
    /// Maximum submissions in flight at once.
    pub concurrency: usize,
    /// Policy for each item submission.
    pub retry: RetryConfig,
    /// Policy for the duplicate lookup.
    pub lookup_retry: RetryConfig,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            progress: None,
            validator: Some(Arc::new(|item: &ExportItem| validate_item(item, "US"))),
            check_duplicates: true,
            concurrency: 4,
            retry: RetryConfig::remote_write(),
            lookup_retry: RetryConfig::remote_read(),
        }
    }
}

impl ExportOptions {
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_validator(mut self, validator: ItemValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_lookup_retry(mut self, retry: RetryConfig) -> Self {
        self.lookup_retry = retry;
        self
    }

    pub fn without_duplicate_check(mut self) -> Self {
        self.check_duplicates = false;
        self
    }
}

/// Returns a progress callback that forwards snapshots into a channel.
///
/// The receiver yields one snapshot per resolved item; the final snapshot
/// has a terminal status. Snapshots sent after the receiver is dropped are
/// discarded.
pub fn progress_channel() -> (ProgressCallback, mpsc::UnboundedReceiver<ExportResult>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: ProgressCallback = Arc::new(move |snapshot: &ExportResult| {
        let _ = tx.send(snapshot.clone());
    });
    (callback, rx)
}

fn notify(progress: &Option<ProgressCallback>, result: &ExportResult) {
    if let Some(callback) = progress {
        callback(result);
    }
}

/// Publishes a snapshot after an item resolved. The snapshot for the last
/// item already carries the terminal status.
fn publish(progress: &Option<ProgressCallback>, result: &mut ExportResult) {
    if result.status == ExportStatus::InProgress && result.resolved() == result.total {
        result.status = ExportStatus::Completed;
    }
    notify(progress, result);
}

/// Drives batch exports against an [`ExportSink`].
#[derive(Debug, Clone, Default)]
pub struct BulkExportPipeline {
    executor: RetryExecutor,
}

impl BulkExportPipeline {
    pub fn new(executor: RetryExecutor) -> Self {
        Self { executor }
    }

    /// Exports `items` through `sink`.
    ///
    /// Individual failures are recorded in the result and never abort the
    /// run; the status is `Completed` once every item is resolved. The
    /// status is `Failed` only when the duplicate lookup itself fails, in
    /// which case nothing is submitted.
    ///
    /// Dropping the returned future abandons the run: submissions already
    /// in flight still finish, including their retries, but their outcomes
    /// are not observed.
    pub async fn submit_batch(
        &self,
        items: Vec<ExportItem>,
        sink: Arc<dyn ExportSink>,
        options: ExportOptions,
    ) -> ExportResult {
        let mut result = ExportResult::new(items.len());

        if items.is_empty() {
            result.status = ExportStatus::Completed;
            notify(&options.progress, &result);
            return result;
        }

        tracing::info!(
            "Starting export run {} with {} items",
            result.run_id,
            result.total
        );
        result.status = ExportStatus::InProgress;

        // 1. Local validation and in-batch deduplication
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(items.len());
        for item in items {
            let identity = item.identity();

            if let Some(validator) = &options.validator {
                if let Err(err) = validator(&item) {
                    tracing::warn!("Skipping invalid item {}: {}", identity, err);
                    result.record_failure(identity, err);
                    publish(&options.progress, &mut result);
                    continue;
                }
            }

            if !seen.insert(identity.clone()) {
                tracing::debug!("Duplicate within batch: {}", identity);
                result.record_skip();
                publish(&options.progress, &mut result);
                continue;
            }

            candidates.push(item);
        }

        // 2. One remote duplicate lookup for the whole run
        if options.check_duplicates && !candidates.is_empty() {
            let identities: Vec<String> = candidates.iter().map(ExportItem::identity).collect();
            let lookup = self
                .executor
                .execute("duplicate lookup", &options.lookup_retry, || {
                    sink.existing_identities(&identities)
                })
                .await;

            match lookup {
                Ok(existing) => {
                    let existing: HashSet<String> =
                        existing.iter().map(|e| normalize_identity(e)).collect();
                    if !existing.is_empty() {
                        tracing::info!(
                            "{} items already exist remotely and will be skipped",
                            existing.len()
                        );
                    }
                    candidates.retain(|item| {
                        if existing.contains(&item.identity()) {
                            result.record_skip();
                            publish(&options.progress, &mut result);
                            false
                        } else {
                            true
                        }
                    });
                }
                Err(err) => {
                    tracing::error!(
                        "Export run {} aborted: duplicate lookup failed: {}",
                        result.run_id,
                        err
                    );
                    result.status = ExportStatus::Failed;
                    result.pipeline_error = Some(err);
                    notify(&options.progress, &result);
                    return result;
                }
            }
        }

        // 3. Concurrent submissions. Each runs on its own task, so dropping
        // this future stops observing outcomes without cutting any request
        // short. Items not yet started are never started.
        let executor = self.executor.clone();
        let retry = options.retry.clone();
        let mut outcomes = stream::iter(candidates)
            .map(move |item| {
                let identity = item.identity();
                let executor = executor.clone();
                let retry = retry.clone();
                let sink = Arc::clone(&sink);
                let handle = tokio::spawn(async move {
                    executor
                        .execute("lead submission", &retry, || sink.submit(&item))
                        .await
                });
                async move { (identity, handle.await) }
            })
            .buffer_unordered(options.concurrency.max(1));

        while let Some((identity, joined)) = outcomes.next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(AppError::unknown(format!("Submission task failed: {}", e))
                    .with_code("TASK_FAILED"))
            });
            match outcome {
                Ok(()) => result.record_success(),
                Err(err) => result.record_failure(identity, err),
            }
            publish(&options.progress, &mut result);
        }

        tracing::info!(
            "Export run {} completed: {} succeeded, {} failed, {} skipped of {}",
            result.run_id,
            result.succeeded,
            result.failed,
            result.skipped,
            result.total
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockSink {
        existing: Vec<String>,
        failing: Vec<String>,
        lookup_fails: bool,
        submitted: Mutex<Vec<String>>,
        submit_calls: AtomicU32,
        lookup_calls: AtomicU32,
    }

    impl ExportSink for MockSink {
        fn existing_identities<'a>(
            &'a self,
            identities: &'a [String],
        ) -> BoxFuture<'a, Result<Vec<String>, RawFailure>> {
            self.lookup_calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if self.lookup_fails {
                    return Err(RawFailure::Response {
                        status: 401,
                        body: String::new(),
                    });
                }
                Ok(identities
                    .iter()
                    .filter(|id| self.existing.contains(*id))
                    .cloned()
                    .collect())
            }
            .boxed()
        }

        fn submit<'a>(&'a self, item: &'a ExportItem) -> BoxFuture<'a, Result<(), RawFailure>> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if self.failing.contains(&item.identity()) {
                    return Err(RawFailure::Response {
                        status: 500,
                        body: "boom".to_string(),
                    });
                }
                self.submitted
                    .lock()
                    .unwrap()
                    .push(item.identity());
                Ok(())
            }
            .boxed()
        }
    }

    /// Sink whose submissions take 100ms to land.
    #[derive(Default)]
    struct SlowSink {
        started: AtomicU32,
        landed: AtomicU32,
    }

    impl ExportSink for SlowSink {
        fn existing_identities<'a>(
            &'a self,
            _identities: &'a [String],
        ) -> BoxFuture<'a, Result<Vec<String>, RawFailure>> {
            async { Ok(Vec::new()) }.boxed()
        }

        fn submit<'a>(&'a self, _item: &'a ExportItem) -> BoxFuture<'a, Result<(), RawFailure>> {
            async move {
                self.started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.landed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }
    }

    fn items(emails: &[&str]) -> Vec<ExportItem> {
        emails.iter().map(|e| ExportItem::new(*e)).collect()
    }

    fn fast_options() -> ExportOptions {
        ExportOptions::default()
            .with_retry(RetryConfig::new(
                2,
                Duration::from_millis(5),
                crate::retry::BackoffStrategy::Fixed,
            ))
            .with_lookup_retry(RetryConfig::no_retry())
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch_completes_immediately() {
        let sink = Arc::new(MockSink::default());
        let result = BulkExportPipeline::default()
            .submit_batch(Vec::new(), sink.clone(), fast_options())
            .await;

        assert_eq!(result.total, 0);
        assert_eq!(result.succeeded, 0);
        assert_eq!(result.failed, 0);
        assert_eq!(result.status, ExportStatus::Completed);
        assert!(result.errors.is_empty());
        assert_eq!(sink.lookup_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_still_completes() {
        let sink = Arc::new(MockSink {
            failing: vec!["e@acme.io".to_string()],
            ..Default::default()
        });
        let batch = items(&["a@acme.io", "b@acme.io", "not-an-email", "d@acme.io", "e@acme.io"]);

        let result = BulkExportPipeline::default()
            .submit_batch(batch, sink.clone(), fast_options())
            .await;

        assert_eq!(result.total, 5);
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.failed, 2);
        assert_eq!(result.status, ExportStatus::Completed);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].identity, "not-an-email");
        assert_eq!(result.errors[0].error.category, ErrorCategory::Validation);
        assert_eq!(result.errors[1].identity, "e@acme.io");
        assert_eq!(result.errors[1].error.category, ErrorCategory::Remote);
        // invalid item never reached the sink; failing item was retried once
        assert_eq!(sink.submit_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_are_skipped() {
        let sink = Arc::new(MockSink {
            existing: vec!["b@acme.io".to_string()],
            ..Default::default()
        });
        let batch = items(&["a@acme.io", "B@acme.io", "c@acme.io", "A@ACME.io"]);

        let result = BulkExportPipeline::default()
            .submit_batch(batch, sink.clone(), fast_options())
            .await;

        assert_eq!(result.total, 4);
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 0);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.status, ExportStatus::Completed);
        assert_eq!(sink.lookup_calls.load(Ordering::SeqCst), 1);

        let mut submitted = sink.submitted.lock().unwrap().clone();
        submitted.sort();
        assert_eq!(submitted, vec!["a@acme.io", "c@acme.io"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_failure_fails_run() {
        let sink = Arc::new(MockSink {
            lookup_fails: true,
            ..Default::default()
        });
        let result = BulkExportPipeline::default()
            .submit_batch(items(&["a@acme.io"]), sink.clone(), fast_options())
            .await;

        assert_eq!(result.status, ExportStatus::Failed);
        assert_eq!(
            result.pipeline_error.unwrap().category,
            ErrorCategory::Auth
        );
        assert_eq!(sink.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_can_be_disabled() {
        let sink = Arc::new(MockSink {
            lookup_fails: true,
            ..Default::default()
        });
        let result = BulkExportPipeline::default()
            .submit_batch(
                items(&["a@acme.io"]),
                sink.clone(),
                fast_options().without_duplicate_check(),
            )
            .await;

        assert_eq!(result.status, ExportStatus::Completed);
        assert_eq!(result.succeeded, 1);
        assert_eq!(sink.lookup_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic() {
        let sink = Arc::new(MockSink {
            failing: vec!["c@acme.io".to_string()],
            existing: vec!["d@acme.io".to_string()],
            ..Default::default()
        });
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&snapshots);
        let options = fast_options()
            .with_concurrency(3)
            .with_progress(Arc::new(move |snapshot: &ExportResult| {
                recorder.lock().unwrap().push(snapshot.clone());
            }));
        let batch = items(&["a@acme.io", "b@acme.io", "c@acme.io", "d@acme.io", "bad"]);

        let result = BulkExportPipeline::default()
            .submit_batch(batch, sink.clone(), options)
            .await;

        let snapshots = snapshots.lock().unwrap();
        let settled: Vec<usize> = snapshots.iter().map(|s| s.succeeded + s.failed).collect();
        assert!(settled.windows(2).all(|w| w[0] <= w[1]));
        assert!(snapshots.iter().all(|s| s.succeeded + s.failed <= s.total));
        assert_eq!(snapshots.len(), result.total);

        let last = snapshots.last().unwrap();
        assert_eq!(last.status, ExportStatus::Completed);
        assert_eq!(last.resolved(), 5);
        assert_eq!(
            snapshots
                .iter()
                .filter(|s| s.status == ExportStatus::Completed)
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_channel_receives_snapshots() {
        let sink = Arc::new(MockSink::default());
        let (callback, mut rx) = progress_channel();
        let result = BulkExportPipeline::default()
            .submit_batch(
                items(&["a@acme.io", "b@acme.io"]),
                sink.clone(),
                fast_options().with_progress(callback),
            )
            .await;

        let mut received = Vec::new();
        while let Ok(snapshot) = rx.try_recv() {
            received.push(snapshot);
        }
        assert_eq!(received.len(), 2);
        assert_eq!(received.last().unwrap(), &result);
        assert!(received.iter().all(|s| s.run_id == result.run_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_run_lets_in_flight_submissions_land() {
        let sink = Arc::new(SlowSink::default());
        let pipeline = BulkExportPipeline::default();
        let run = pipeline.submit_batch(
            items(&["a@acme.io", "b@acme.io"]),
            sink.clone(),
            fast_options(),
        );

        let abandoned = tokio::time::timeout(Duration::from_millis(10), run).await;
        assert!(abandoned.is_err());
        assert_eq!(sink.started.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.landed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_run_starts_nothing_new() {
        let sink = Arc::new(SlowSink::default());
        let pipeline = BulkExportPipeline::default();
        let run = pipeline.submit_batch(
            items(&["a@acme.io", "b@acme.io", "c@acme.io"]),
            sink.clone(),
            fast_options().with_concurrency(1),
        );

        assert!(tokio::time::timeout(Duration::from_millis(10), run)
            .await
            .is_err());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.started.load(Ordering::SeqCst), 1);
        assert_eq!(sink.landed.load(Ordering::SeqCst), 1);
    }
}
