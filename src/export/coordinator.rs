//! Export coordinator for orchestrating export jobs
//!
//! Drives the result streamer into the chosen sink batch by batch. Any
//! failure or cancellation aborts the sink, so no partial object is left
//! behind.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

use super::progress::ProgressTracker;
use super::sink::Sink;
use super::streaming::ResultStreamer;

/// Result of an export pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    /// Rows delivered to storage
    pub rows: u64,
    /// Object size in bytes
    pub bytes: u64,
    /// Parts uploaded; 0 for a single put
    pub parts: usize,
    /// Time taken by the pipeline
    pub elapsed_ms: u64,
    /// Whether the run was cancelled before completion
    pub cancelled: bool,
}

/// Coordinator for export jobs
pub struct ExportCoordinator {
    /// Row stream for the composed statement
    streamer: ResultStreamer,
    /// Progress tracker for user feedback
    tracker: ProgressTracker,
    /// Sink for the output object
    sink: Box<dyn Sink>,
    /// Cancellation token for aborting the job
    cancel_token: Option<CancellationToken>,
}

impl ExportCoordinator {
    pub fn new(streamer: ResultStreamer, tracker: ProgressTracker, sink: Box<dyn Sink>) -> Self {
        Self {
            streamer,
            tracker,
            sink,
            cancel_token: None,
        }
    }

    /// Set cancellation token for this job
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Execute the pipeline
    ///
    /// Streams every batch into the sink, closes the stream, then finalizes
    /// the sink. On error the sink is aborted and the error returned; on
    /// cancellation the sink is aborted and the outcome flagged.
    ///
    /// # Returns
    /// * `Result<ExportOutcome>` - Delivery statistics or error
    pub async fn execute(&mut self) -> Result<ExportOutcome> {
        let start_time = Instant::now();
        info!("Starting export pipeline");

        match self.pump().await {
            Ok(true) => {}
            Ok(false) => {
                info!("Export cancelled, aborting output");
                self.discard().await;
                return Ok(ExportOutcome {
                    rows: 0,
                    bytes: 0,
                    parts: 0,
                    elapsed_ms: start_time.elapsed().as_millis() as u64,
                    cancelled: true,
                });
            }
            Err(err) => {
                warn!("Export failed, aborting output: {}", err);
                self.discard().await;
                return Err(err);
            }
        }

        // The read transaction must commit before the object becomes visible.
        let rows = match self.streamer.finish().await {
            Ok(rows) => rows,
            Err(err) => {
                warn!("Closing result stream failed, aborting output: {}", err);
                self.abort_output().await;
                return Err(err);
            }
        };

        debug!("Finalizing output object");
        let report = match self.sink.finalize().await {
            Ok(report) => report,
            Err(err) => {
                self.abort_output().await;
                return Err(err);
            }
        };
        self.tracker.finish();

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        info!(
            "Export completed: {} rows, {} bytes, {} part(s), {} ms",
            rows, report.bytes, report.parts, elapsed_ms
        );

        Ok(ExportOutcome {
            rows,
            bytes: report.bytes,
            parts: report.parts,
            elapsed_ms,
            cancelled: false,
        })
    }

    /// Move batches until the stream ends (`true`) or the token fires (`false`).
    async fn pump(&mut self) -> Result<bool> {
        let mut batch_count = 0u32;

        loop {
            if self.is_cancelled() {
                return Ok(false);
            }

            debug!("Fetching batch #{}", batch_count + 1);
            let Some(rows) = self.streamer.next_batch().await? else {
                return Ok(true);
            };

            self.sink.write_batch(&rows).await?;
            self.tracker.update(self.streamer.rows_streamed());
            batch_count += 1;

            if batch_count % 10 == 0 {
                info!(
                    "Progress: {} rows exported ({} batches)",
                    self.streamer.rows_streamed(),
                    batch_count
                );
            }
        }
    }

    /// Abort the sink and release the stream; errors here are only logged.
    async fn discard(&mut self) {
        if let Err(err) = self.streamer.finish().await {
            warn!("Failed to close result stream: {}", err);
        }
        self.abort_output().await;
    }

    async fn abort_output(&mut self) {
        if let Err(err) = self.sink.abort().await {
            warn!("Failed to abort output: {}", err);
        }
        self.tracker.finish();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::error::ExportError;
    use crate::export::convert::{Column, ColumnType, KeyNaming, SqlValue};
    use crate::export::sink::{self, SinkSettings, SinkStrategy};
    use crate::export::streaming::memory::MemoryRowSource;
    use crate::storage::ObjectLocation;
    use crate::storage::memory::MemoryStore;

    fn source(rows: usize) -> MemoryRowSource {
        let columns = vec![
            Column::new("granule_id", ColumnType::Text),
            Column::new("published", ColumnType::Bool),
        ];
        let rows = (0..rows)
            .map(|i| vec![SqlValue::Text(format!("g{i}")), SqlValue::Bool(i % 2 == 0)])
            .collect();
        MemoryRowSource::new(columns, rows, 3)
    }

    fn tiny_parts() -> SinkSettings {
        SinkSettings {
            avg_bytes_per_value: 8,
            multipart_threshold_bytes: 0,
            part_size_bytes: 32,
            min_part_bytes: 32,
        }
    }

    async fn coordinator(
        source: MemoryRowSource,
        strategy: SinkStrategy,
        store: Arc<MemoryStore>,
    ) -> ExportCoordinator {
        let sink = sink::open_sink(
            strategy,
            store,
            ObjectLocation::new("bucket", "out.json"),
            &tiny_parts(),
            2,
        )
        .await
        .unwrap();
        let streamer = ResultStreamer::new(Box::new(source), KeyNaming::Storage);
        ExportCoordinator::new(streamer, ProgressTracker::new(None, false), sink)
    }

    #[tokio::test]
    async fn test_coordinator_basic() {
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = coordinator(source(7), SinkStrategy::SingleShot, store.clone()).await;
        let outcome = coordinator.execute().await.unwrap();

        assert_eq!(outcome.rows, 7);
        assert!(!outcome.cancelled);
        let object = store
            .object(&ObjectLocation::new("bucket", "out.json"))
            .unwrap();
        assert_eq!(outcome.bytes, object.len() as u64);
        let parsed: serde_json::Value = serde_json::from_slice(&object).unwrap();
        assert_eq!(parsed[6]["granule_id"], "g6");
    }

    #[tokio::test]
    async fn test_coordinator_empty_result() {
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = coordinator(source(0), SinkStrategy::Multipart, store.clone()).await;
        let outcome = coordinator.execute().await.unwrap();

        assert_eq!(outcome.rows, 0);
        assert_eq!(outcome.parts, 1);
        assert_eq!(
            store.object(&ObjectLocation::new("bucket", "out.json")).unwrap(),
            b"[]"
        );
    }

    #[tokio::test]
    async fn test_database_error_aborts_multipart() {
        let store = Arc::new(MemoryStore::new());
        let source = source(30).failing_after(4);
        let closed = source.closed.clone();
        let mut coordinator = coordinator(source, SinkStrategy::Multipart, store.clone()).await;

        let err = coordinator.execute().await.unwrap_err();
        assert!(matches!(err, ExportError::Database { .. }));
        assert_eq!(store.aborted().len(), 1);
        assert_eq!(store.object_count(), 0);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_upload_error_stops_pipeline() {
        let store = Arc::new(MemoryStore::failing_part(1));
        let mut coordinator = coordinator(source(30), SinkStrategy::Multipart, store.clone()).await;

        let err = coordinator.execute().await.unwrap_err();
        assert!(matches!(err, ExportError::Upload(_)));
        assert_eq!(store.object_count(), 0);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_failed_abort_is_retried_on_discard() {
        let store = Arc::new(MemoryStore::failing_part(1).with_failing_aborts(1));
        let mut coordinator = coordinator(source(30), SinkStrategy::Multipart, store.clone()).await;

        let err = coordinator.execute().await.unwrap_err();
        assert!(err.to_string().contains("part 1 rejected"));
        assert_eq!(store.aborted().len(), 1);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_close_failure_leaves_no_object() {
        for strategy in [SinkStrategy::SingleShot, SinkStrategy::Multipart] {
            let store = Arc::new(MemoryStore::new());
            let mut coordinator =
                coordinator(source(4).failing_close(), strategy, store.clone()).await;

            let err = coordinator.execute().await.unwrap_err();
            assert!(matches!(err, ExportError::Database { .. }));
            assert_eq!(store.object_count(), 0);
            assert_eq!(store.open_sessions(), 0);
        }
    }

    #[tokio::test]
    async fn test_cancellation_aborts_without_object() {
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        token.cancel();
        let mut coordinator = coordinator(source(10), SinkStrategy::Multipart, store.clone())
            .await
            .with_cancellation(token);

        let outcome = coordinator.execute().await.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.rows, 0);
        assert_eq!(store.object_count(), 0);
        assert_eq!(store.aborted().len(), 1);
    }
}
