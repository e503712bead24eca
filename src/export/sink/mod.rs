//! Output sinks
//!
//! A sink receives serialized rows and delivers them to object storage as one
//! JSON array. Which sink a job uses is a pure function of the size estimate
//! taken before the first row is fetched:
//!
//! - below the threshold, [`SingleShotSink`] buffers everything and issues one put;
//! - at or above it, [`MultipartSink`] streams sequential parts.
//!
//! Both produce byte-identical objects for the same rows.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::storage::{ObjectLocation, ObjectStore};

pub mod multipart;
pub mod single;

pub use multipart::MultipartSink;
pub use single::SingleShotSink;

/// Smallest part size object stores accept for any part but the last.
pub const MIN_PART_BYTES: u64 = 5 * 1024 * 1024;

/// Size model and part sizing for sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSettings {
    /// Average serialized size of one column value
    pub avg_bytes_per_value: u64,
    /// Estimates at or above this use the multipart sink
    pub multipart_threshold_bytes: u64,
    /// Target part size, tracked through the value count
    pub part_size_bytes: u64,
    /// Buffered bytes required before a non-final part is flushed
    pub min_part_bytes: u64,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            avg_bytes_per_value: 70,
            multipart_threshold_bytes: 50 * 1024 * 1024,
            part_size_bytes: 20 * 1024 * 1024,
            min_part_bytes: MIN_PART_BYTES,
        }
    }
}

impl SinkSettings {
    /// `rows × columns × avg_bytes_per_value`
    pub fn estimate(&self, rows: u64, columns: usize) -> u64 {
        rows.saturating_mul(columns as u64)
            .saturating_mul(self.avg_bytes_per_value)
    }

    /// Values to accumulate before a part is due.
    pub fn part_value_budget(&self) -> u64 {
        (self.part_size_bytes / self.avg_bytes_per_value.max(1)).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStrategy {
    SingleShot,
    Multipart,
}

/// Choose a sink for an estimated object size. The threshold is inclusive.
pub fn select_strategy(estimated_bytes: u64, threshold: u64) -> SinkStrategy {
    if estimated_bytes >= threshold {
        SinkStrategy::Multipart
    } else {
        SinkStrategy::SingleShot
    }
}

/// What a finalized sink delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkReport {
    pub rows: u64,
    pub bytes: u64,
    /// Parts uploaded; 0 for a single put
    pub parts: usize,
}

#[async_trait]
pub trait Sink: Send {
    /// Append serialized rows.
    ///
    /// # Arguments
    /// * `rows` - One compact JSON object per row
    async fn write_batch(&mut self, rows: &[String]) -> Result<()>;

    /// Close the array and make the object visible.
    async fn finalize(&mut self) -> Result<SinkReport>;

    /// Drop everything written so far. Safe to call more than once.
    async fn abort(&mut self) -> Result<()>;
}

/// Open the sink for `strategy`.
///
/// # Arguments
/// * `strategy` - Result of [`select_strategy`]
/// * `store` - Storage backend
/// * `location` - Object to produce
/// * `settings` - Part sizing
/// * `columns` - Values per row, for the part budget
///
/// # Returns
/// * `Result<Box<dyn Sink>>` - Ready sink; multipart sessions are opened here
pub async fn open_sink(
    strategy: SinkStrategy,
    store: Arc<dyn ObjectStore>,
    location: ObjectLocation,
    settings: &SinkSettings,
    columns: usize,
) -> Result<Box<dyn Sink>> {
    info!(
        "Writing {} with {:?} sink via {}",
        location,
        strategy,
        store.name()
    );
    let sink: Box<dyn Sink> = match strategy {
        SinkStrategy::SingleShot => Box::new(SingleShotSink::new(store, location)),
        SinkStrategy::Multipart => {
            Box::new(MultipartSink::begin(store, location, settings.clone(), columns).await?)
        }
    };
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    fn rows(count: usize, width: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!(r#"{{"id":{i},"pad":"{}"}}"#, "x".repeat(width)))
            .collect()
    }

    fn small_parts() -> SinkSettings {
        SinkSettings {
            avg_bytes_per_value: 10,
            multipart_threshold_bytes: 1,
            part_size_bytes: 100,
            min_part_bytes: 64,
        }
    }

    async fn deliver(strategy: SinkStrategy, store: Arc<MemoryStore>, rows: &[String]) -> Vec<u8> {
        let location = ObjectLocation::new("bucket", "key.json");
        let mut sink = open_sink(strategy, store.clone(), location.clone(), &small_parts(), 2)
            .await
            .unwrap();
        for batch in rows.chunks(7) {
            sink.write_batch(batch).await.unwrap();
        }
        sink.finalize().await.unwrap();
        store.object(&location).unwrap()
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let threshold = 50 * 1024 * 1024;
        assert_eq!(select_strategy(threshold - 1, threshold), SinkStrategy::SingleShot);
        assert_eq!(select_strategy(threshold, threshold), SinkStrategy::Multipart);
        assert_eq!(select_strategy(threshold + 1, threshold), SinkStrategy::Multipart);
    }

    #[test]
    fn test_estimate() {
        let settings = SinkSettings::default();
        assert_eq!(settings.estimate(1000, 10), 700_000);
        assert_eq!(settings.estimate(0, 10), 0);
        assert_eq!(settings.estimate(u64::MAX, 10), u64::MAX);
        // 20 MiB / 70
        assert_eq!(settings.part_value_budget(), 299_593);
    }

    #[tokio::test]
    async fn test_multipart_concatenation_equals_single_shot() {
        let rows = rows(50, 12);

        let single_store = Arc::new(MemoryStore::new());
        let single = deliver(SinkStrategy::SingleShot, single_store.clone(), &rows).await;

        let multi_store = Arc::new(MemoryStore::new());
        let multi = deliver(SinkStrategy::Multipart, multi_store.clone(), &rows).await;

        assert_eq!(single, multi);
        assert!(multi_store.completed_parts().len() > 2);
        assert_eq!(single_store.put_count(), 1);

        let parsed: serde_json::Value = serde_json::from_slice(&single).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_empty_input_is_an_empty_array() {
        for strategy in [SinkStrategy::SingleShot, SinkStrategy::Multipart] {
            let store = Arc::new(MemoryStore::new());
            assert_eq!(deliver(strategy, store, &[]).await, b"[]");
        }
    }
}
