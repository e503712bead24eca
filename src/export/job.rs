//! Export jobs
//!
//! A job composes the statement for a request, streams its rows into a sink
//! and reports the outcome as a [`JobManifest`]. Composition failures are
//! returned as errors; anything that fails after the statement exists is
//! recorded in the manifest instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::error::{ErrorInfo, ExportError, Result};
use crate::query::{ComposedQuery, ExportRequest, QueryComposer};
use crate::storage::{ObjectLocation, ObjectStore};

use super::convert::KeyNaming;
use super::coordinator::{ExportCoordinator, ExportOutcome};
use super::progress::ProgressTracker;
use super::sink::{self, SinkSettings};
use super::streaming::{ResultStreamer, RowSourceFactory};

/// Outcome record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobManifest {
    pub bucket: String,
    pub key: String,
    /// Rows delivered; 0 when the job failed or was cancelled
    pub row_count: u64,
    pub query_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl JobManifest {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Where and how a job writes its output.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub bucket: String,
    pub key_prefix: String,
    pub naming: KeyNaming,
    pub sink: SinkSettings,
    /// Show a progress bar while streaming
    pub show_progress: bool,
}

impl JobSettings {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key_prefix: String::new(),
            naming: KeyNaming::default(),
            sink: SinkSettings::default(),
            show_progress: false,
        }
    }
}

/// Object key for a job started at `now`: `{prefix}query_results_{unix_nanos}.json`.
pub fn object_key(prefix: &str, now: DateTime<Utc>) -> String {
    let nanos = now.timestamp_nanos_opt().unwrap_or_default();
    format!("{prefix}query_results_{nanos}.json")
}

/// Runs requests against a row source factory and an object store.
pub struct ExportJob {
    composer: QueryComposer,
    sources: Arc<dyn RowSourceFactory>,
    store: Arc<dyn ObjectStore>,
    settings: JobSettings,
    cancel_token: Option<CancellationToken>,
}

impl ExportJob {
    pub fn new(
        composer: QueryComposer,
        sources: Arc<dyn RowSourceFactory>,
        store: Arc<dyn ObjectStore>,
        settings: JobSettings,
    ) -> Self {
        Self {
            composer,
            sources,
            store,
            settings,
            cancel_token: None,
        }
    }

    /// Set cancellation token for jobs run by this instance
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Run one export.
    ///
    /// # Arguments
    /// * `request` - Entity, columns, filters and limits
    ///
    /// # Returns
    /// * `Result<JobManifest>` - Manifest, with `error` set for pipeline failures;
    ///   `Err` only when no statement could be composed
    pub async fn run(&self, request: &ExportRequest) -> Result<JobManifest> {
        let job_id = Uuid::new_v4();
        let span = info_span!("export_job", job_id = %job_id, entity = %request.entity);
        self.run_job(request).instrument(span).await
    }

    async fn run_job(&self, request: &ExportRequest) -> Result<JobManifest> {
        let query = self.composer.compose(request)?;
        let location = ObjectLocation::new(
            self.settings.bucket.clone(),
            object_key(&self.settings.key_prefix, Utc::now()),
        );
        info!("Exporting {} to {}", query.entity, location);

        let (row_count, error) = match self.pipeline(&query, &location).await {
            Ok(outcome) if outcome.cancelled => {
                warn!("Job cancelled after {} ms", outcome.elapsed_ms);
                let err = ExportError::Cancelled("job stopped before completion".to_string());
                (0, Some(ErrorInfo::from_error(&err)))
            }
            Ok(outcome) => (outcome.rows, None),
            Err(err) => {
                error!("Job failed: {}", err);
                (0, Some(ErrorInfo::from_error(&err)))
            }
        };

        Ok(JobManifest {
            bucket: location.bucket,
            key: location.key,
            row_count,
            query_text: query.sql,
            error,
        })
    }

    async fn pipeline(&self, query: &ComposedQuery, location: &ObjectLocation) -> Result<ExportOutcome> {
        let source = self.sources.open(query).await?;
        let streamer = ResultStreamer::new(source, self.settings.naming);

        let projected = streamer.projected_rows();
        let columns = streamer.column_count();
        let estimated = self.settings.sink.estimate(projected, columns);
        let strategy =
            sink::select_strategy(estimated, self.settings.sink.multipart_threshold_bytes);
        info!(
            "Projected {} rows x {} columns, about {} bytes",
            projected, columns, estimated
        );

        let sink = sink::open_sink(
            strategy,
            self.store.clone(),
            location.clone(),
            &self.settings.sink,
            columns,
        )
        .await?;
        let tracker = ProgressTracker::new(Some(projected), self.settings.show_progress);

        let mut coordinator = ExportCoordinator::new(streamer, tracker, sink);
        if let Some(ref token) = self.cancel_token {
            coordinator = coordinator.with_cancellation(token.clone());
        }
        coordinator.execute().await
    }
}
