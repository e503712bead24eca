//! Export pipeline
//!
//! This module turns a composed statement into a JSON array object in storage:
//! - Cursor-based streaming so memory is bounded by the batch size
//! - Row canonicalization to JSON
//! - Single-shot or multipart output, chosen from a size estimate
//! - Progress tracking with real-time feedback
//!
//! # Architecture
//!
//! 1. **RowSource**: fetches typed rows in batches (`PostgresCursor` in production)
//! 2. **ResultStreamer**: serializes rows and counts them
//! 3. **Sink**: delivers the serialized rows to an `ObjectStore`
//!
//! These are orchestrated by the **ExportCoordinator**; an **ExportJob** wraps
//! composition, sink selection and the coordinator, and reports a manifest.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rds_export::export::{ExportJob, JobSettings, PgCursorFactory, RowCountMode};
//! use rds_export::query::{ExportRequest, QueryComposer};
//! use rds_export::storage::FilesystemStore;
//!
//! # async fn run(pool: sqlx::PgPool) -> rds_export::error::Result<()> {
//! let job = ExportJob::new(
//!     QueryComposer::new(),
//!     Arc::new(PgCursorFactory::new(pool, RowCountMode::Exact)),
//!     Arc::new(FilesystemStore::new("/tmp/exports")),
//!     JobSettings::new("local-bucket"),
//! );
//! let request = ExportRequest::new("granules").filter("granules", "status = 'completed'");
//! let manifest = job.run(&request).await?;
//! println!("{} rows -> {}", manifest.row_count, manifest.key);
//! # Ok(())
//! # }
//! ```

pub mod convert;
pub mod coordinator;
pub mod job;
pub mod postgres;
pub mod progress;
pub mod sink;
pub mod streaming;

pub use convert::{Column, ColumnType, KeyNaming, SqlValue};
pub use coordinator::{ExportCoordinator, ExportOutcome};
pub use job::{ExportJob, JobManifest, JobSettings, object_key};
pub use postgres::{PgCursorFactory, PostgresCursor, RowCountMode};
pub use progress::ProgressTracker;
pub use sink::{Sink, SinkSettings, SinkStrategy, select_strategy};
pub use streaming::{ResultStreamer, RowSource, RowSourceFactory};
