//! Progress tracking for export jobs
//!
//! Shows a progress bar on stderr while rows are streamed, sized by the row
//! count projected before the first fetch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

/// Progress tracker for export jobs
///
/// Tracks rows streamed and displays a progress bar with throughput.
pub struct ProgressTracker {
    /// Rows streamed so far
    processed: AtomicU64,
    /// Start time of the job
    start_time: Instant,
    /// Progress bar (optional, can be disabled)
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `total` - Projected row count if known (None for unknown)
    /// * `enable_bar` - Whether to display a progress bar
    ///
    /// # Returns
    /// * `Self` - New progress tracker instance
    pub fn new(total: Option<u64>, enable_bar: bool) -> Self {
        let bar = enable_bar.then(|| match total {
            Some(n) => {
                let bar = ProgressBar::new(n);
                let style = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} rows {msg}")
                    .map(|style| style.progress_chars("#>-"))
                    .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style);
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                let style = ProgressStyle::default_spinner()
                    .template("{spinner:.green} {pos} rows {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner());
                bar.set_style(style);
                bar
            }
        });

        Self {
            processed: AtomicU64::new(0),
            start_time: Instant::now(),
            bar,
        }
    }

    /// Update progress with new count
    ///
    /// # Arguments
    /// * `count` - Total number of rows streamed so far
    pub fn update(&self, count: u64) {
        self.processed.store(count, Ordering::Relaxed);

        if let Some(ref bar) = self.bar {
            // Projections in limit mode can undershoot.
            if bar.length().is_some_and(|len| count > len) {
                bar.set_length(count);
            }
            bar.set_position(count);

            let elapsed = self.start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                let speed = count as f64 / elapsed;
                bar.set_message(format!("({:.0} rows/sec)", speed));
            }
        }
    }

    /// Rows recorded by the last update
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_tracker_with_total() {
        let tracker = ProgressTracker::new(Some(1000), false);
        tracker.update(500);
        assert_eq!(tracker.processed(), 500);
    }

    #[test]
    fn test_progress_tracker_without_total() {
        let tracker = ProgressTracker::new(None, false);
        tracker.update(500);
        tracker.update(750);
        assert_eq!(tracker.processed(), 750);
    }

    #[test]
    fn test_progress_tracker_grows_past_projection() {
        let tracker = ProgressTracker::new(Some(10), true);
        tracker.update(25);
        assert_eq!(tracker.processed(), 25);
        tracker.finish();
    }
}
