//! Result streaming
//!
//! A [`RowSource`] yields typed rows in bounded batches; the [`ResultStreamer`]
//! on top of it serializes each row and keeps the running row count.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::query::ComposedQuery;

use super::convert::{self, Column, KeyNaming, SqlValue};

/// One decoded result row, in column order.
pub type Row = Vec<SqlValue>;

/// Trait for fetching result rows in batches
///
/// Implementations hold server resources (cursor, transaction) until
/// [`close`](RowSource::close) is called or the source is dropped.
#[async_trait]
pub trait RowSource: Send {
    /// Result columns, known before the first fetch
    fn columns(&self) -> &[Column];

    /// Rows the source expects to yield, for size estimation
    fn projected_rows(&self) -> u64;

    /// Fetch the next batch of rows
    ///
    /// # Returns
    /// * `Result<Option<Vec<Row>>>` - Next batch, or None once exhausted
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>>;

    /// Release the source's resources
    async fn close(&mut self) -> Result<()>;
}

/// Opens a row source for a composed statement.
#[async_trait]
pub trait RowSourceFactory: Send + Sync {
    async fn open(&self, query: &ComposedQuery) -> Result<Box<dyn RowSource>>;
}

/// Serializes rows of a [`RowSource`] and counts them.
pub struct ResultStreamer {
    source: Box<dyn RowSource>,
    naming: KeyNaming,
    rows: u64,
    exhausted: bool,
}

impl ResultStreamer {
    pub fn new(source: Box<dyn RowSource>, naming: KeyNaming) -> Self {
        Self {
            source,
            naming,
            rows: 0,
            exhausted: false,
        }
    }

    pub fn column_count(&self) -> usize {
        self.source.columns().len()
    }

    pub fn projected_rows(&self) -> u64 {
        self.source.projected_rows()
    }

    /// Rows streamed so far.
    pub fn rows_streamed(&self) -> u64 {
        self.rows
    }

    /// Next batch of serialized rows, or None once the source is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<String>>> {
        if self.exhausted {
            return Ok(None);
        }

        let Some(batch) = self.source.next_batch().await? else {
            self.exhausted = true;
            debug!("Result stream exhausted after {} rows", self.rows);
            return Ok(None);
        };

        let columns = self.source.columns();
        let encoded = batch
            .iter()
            .map(|row| convert::encode_row(columns, row, self.naming))
            .collect::<Result<Vec<_>>>()?;

        self.rows += encoded.len() as u64;
        debug!(
            "Streamed batch of {} rows (total: {})",
            encoded.len(),
            self.rows
        );
        Ok(Some(encoded))
    }

    /// Close the source and report the final row count.
    pub async fn finish(&mut self) -> Result<u64> {
        self.source.close().await?;
        info!("Result stream closed after {} rows", self.rows);
        Ok(self.rows)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::memory::MemoryRowSource;
    use super::*;
    use crate::error::ExportError;
    use crate::export::convert::ColumnType;

    fn source(rows: usize, batch: usize) -> MemoryRowSource {
        let columns = vec![
            Column::new("name", ColumnType::Text),
            Column::new("port", ColumnType::Int),
        ];
        let rows = (0..rows)
            .map(|i| vec![SqlValue::Text(format!("p{i}")), SqlValue::Int(i as i64)])
            .collect();
        MemoryRowSource::new(columns, rows, batch)
    }

    #[tokio::test]
    async fn test_streams_serialized_batches_and_counts() {
        let source = source(5, 2);
        let closed = source.closed.clone();
        let mut streamer = ResultStreamer::new(Box::new(source), KeyNaming::Storage);
        assert_eq!(streamer.projected_rows(), 5);
        assert_eq!(streamer.column_count(), 2);

        let mut sizes = Vec::new();
        let mut counts = Vec::new();
        while let Some(batch) = streamer.next_batch().await.unwrap() {
            sizes.push(batch.len());
            counts.push(streamer.rows_streamed());
            assert!(batch.iter().all(|row| row.starts_with(r#"{"name":"p"#)));
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(counts, vec![2, 4, 5]);
        assert!(streamer.next_batch().await.unwrap().is_none());

        assert_eq!(streamer.finish().await.unwrap(), 5);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_database_failure_propagates() {
        let mut streamer =
            ResultStreamer::new(Box::new(source(5, 2).failing_after(1)), KeyNaming::Storage);
        assert!(streamer.next_batch().await.unwrap().is_some());
        let err = streamer.next_batch().await.unwrap_err();
        assert!(matches!(err, ExportError::Database { .. }));
        assert_eq!(streamer.rows_streamed(), 2);
    }
}
