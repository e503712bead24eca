//! Multipart sink
//!
//! Parts partition the byte stream of the JSON array: the first part opens
//! with `[`, rows are separated by `,` (so every later part starts with one),
//! and the final part carries the remainder and the closing `]`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{ExportError, Result};
use crate::storage::{CompletedPart, ObjectLocation, ObjectStore};

use super::{Sink, SinkReport, SinkSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    /// A store call failed; only `abort` is still allowed
    Failed,
    Completed,
    Aborted,
}

pub struct MultipartSink {
    store: Arc<dyn ObjectStore>,
    location: ObjectLocation,
    upload_id: String,
    settings: SinkSettings,
    /// Values per row
    columns: u64,
    pending: Vec<u8>,
    pending_values: u64,
    parts: Vec<CompletedPart>,
    rows: u64,
    bytes: u64,
    state: State,
}

impl MultipartSink {
    /// Open the upload session.
    ///
    /// # Arguments
    /// * `store` - Storage backend
    /// * `location` - Object to produce
    /// * `settings` - Part sizing
    /// * `columns` - Values per row
    pub async fn begin(
        store: Arc<dyn ObjectStore>,
        location: ObjectLocation,
        settings: SinkSettings,
        columns: usize,
    ) -> Result<Self> {
        let upload_id = store.begin_multipart(&location).await?;
        info!("Started multipart upload {} for {}", upload_id, location);

        Ok(Self {
            store,
            location,
            upload_id,
            settings,
            columns: columns.max(1) as u64,
            pending: Vec::new(),
            pending_values: 0,
            parts: Vec::new(),
            rows: 0,
            bytes: 0,
            state: State::Open,
        })
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn part_due(&self) -> bool {
        self.pending_values >= self.settings.part_value_budget()
            && self.pending.len() as u64 >= self.settings.min_part_bytes
    }

    /// Upload `body` as the next part; aborts the session on failure.
    async fn upload(&mut self, body: Vec<u8>) -> Result<()> {
        let part_number = self.parts.len() as i32 + 1;
        let size = body.len() as u64;

        match self
            .store
            .upload_part(&self.location, &self.upload_id, part_number, body)
            .await
        {
            Ok(tag) => {
                debug!("Uploaded part {} ({} bytes)", part_number, size);
                self.parts.push(CompletedPart { part_number, tag });
                self.bytes += size;
                Ok(())
            }
            Err(err) => {
                warn!("Part {} failed, aborting upload: {}", part_number, err);
                self.state = State::Failed;
                self.try_abort().await;
                Err(match err {
                    ExportError::Upload(_) => err,
                    other => ExportError::upload(other),
                })
            }
        }
    }

    /// Abort after a failed store call, keeping the original error for the caller.
    async fn try_abort(&mut self) {
        if let Err(err) = self.abort().await {
            warn!("Aborting upload {} failed: {}", self.upload_id, err);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::Failed => Err(ExportError::upload("multipart upload failed")),
            State::Completed => Err(ExportError::upload("multipart upload already completed")),
            State::Aborted => Err(ExportError::upload("multipart upload was aborted")),
        }
    }
}

#[async_trait]
impl Sink for MultipartSink {
    async fn write_batch(&mut self, rows: &[String]) -> Result<()> {
        self.ensure_open()?;

        for row in rows {
            self.pending.push(if self.rows == 0 { b'[' } else { b',' });
            self.pending.extend_from_slice(row.as_bytes());
            self.pending_values += self.columns;
            self.rows += 1;

            if self.part_due() {
                let body = std::mem::take(&mut self.pending);
                self.pending_values = 0;
                self.upload(body).await?;
            }
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<SinkReport> {
        self.ensure_open()?;

        let mut body = std::mem::take(&mut self.pending);
        if self.rows == 0 {
            body.push(b'[');
        }
        body.push(b']');
        self.pending_values = 0;
        self.upload(body).await?;

        if let Err(err) = self
            .store
            .complete_multipart(&self.location, &self.upload_id, &self.parts)
            .await
        {
            warn!("Completing {} failed, aborting upload: {}", self.location, err);
            self.state = State::Failed;
            self.try_abort().await;
            return Err(err);
        }
        self.state = State::Completed;

        info!(
            "Completed multipart upload of {} rows in {} part(s) to {}",
            self.rows,
            self.parts.len(),
            self.location
        );
        Ok(SinkReport {
            rows: self.rows,
            bytes: self.bytes,
            parts: self.parts.len(),
        })
    }

    async fn abort(&mut self) -> Result<()> {
        if !matches!(self.state, State::Open | State::Failed) {
            return Ok(());
        }
        self.pending = Vec::new();
        self.store
            .abort_multipart(&self.location, &self.upload_id)
            .await?;
        self.state = State::Aborted;
        info!("Aborted multipart upload {}", self.upload_id);
        Ok(())
    }
}
