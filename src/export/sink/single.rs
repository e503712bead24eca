//! Single-shot sink

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ExportError, Result};
use crate::storage::{ObjectLocation, ObjectStore};

use super::{Sink, SinkReport};

/// Buffers the whole array and writes it with one put.
pub struct SingleShotSink {
    store: Arc<dyn ObjectStore>,
    location: ObjectLocation,
    body: Vec<u8>,
    rows: u64,
    done: bool,
}

impl SingleShotSink {
    pub fn new(store: Arc<dyn ObjectStore>, location: ObjectLocation) -> Self {
        Self {
            store,
            location,
            body: vec![b'['],
            rows: 0,
            done: false,
        }
    }
}

#[async_trait]
impl Sink for SingleShotSink {
    async fn write_batch(&mut self, rows: &[String]) -> Result<()> {
        if self.done {
            return Err(ExportError::upload("sink already closed"));
        }
        for row in rows {
            if self.rows > 0 {
                self.body.push(b',');
            }
            self.body.extend_from_slice(row.as_bytes());
            self.rows += 1;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<SinkReport> {
        if self.done {
            return Err(ExportError::upload("sink already closed"));
        }
        self.done = true;

        let mut body = std::mem::take(&mut self.body);
        body.push(b']');
        let bytes = body.len() as u64;
        self.store.put(&self.location, body).await?;

        debug!("Put {} rows ({} bytes) to {}", self.rows, bytes, self.location);
        Ok(SinkReport {
            rows: self.rows,
            bytes,
            parts: 0,
        })
    }

    async fn abort(&mut self) -> Result<()> {
        // Nothing reached storage yet.
        self.done = true;
        self.body = Vec::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    #[tokio::test]
    async fn test_single_put_of_whole_array() {
        let store = Arc::new(MemoryStore::new());
        let location = ObjectLocation::new("b", "k");
        let mut sink = SingleShotSink::new(store.clone(), location.clone());

        sink.write_batch(&[r#"{"a":1}"#.to_string()]).await.unwrap();
        sink.write_batch(&[r#"{"a":2}"#.to_string(), r#"{"a":3}"#.to_string()])
            .await
            .unwrap();
        assert_eq!(store.put_count(), 0);

        let report = sink.finalize().await.unwrap();
        assert_eq!(report.rows, 3);
        assert_eq!(store.put_count(), 1);
        assert_eq!(
            store.object(&location).unwrap(),
            br#"[{"a":1},{"a":2},{"a":3}]"#
        );
    }

    #[tokio::test]
    async fn test_abort_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let mut sink = SingleShotSink::new(store.clone(), ObjectLocation::new("b", "k"));
        sink.write_batch(&["{}".to_string()]).await.unwrap();
        sink.abort().await.unwrap();
        sink.abort().await.unwrap();
        assert_eq!(store.object_count(), 0);
        assert!(sink.finalize().await.is_err());
    }
}
