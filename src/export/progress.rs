//! Progress reporting for export runs
//!
//! The coordinator reports through [`ProgressObserver`]; the default
//! [`ProgressTracker`] logs milestones and can drive a terminal spinner.

use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use super::coordinator::ExportReport;
use super::paginator::Cursor;

/// Receives progress and completion notifications from a run
pub trait ProgressObserver: Send {
    /// Called after every page with the running total
    fn on_page(&mut self, _rows_processed: u64, _cursor: Cursor) {}

    /// Called each time the running total crosses a progress milestone
    fn on_progress(&mut self, rows_processed: u64);

    /// Called once, after teardown
    fn on_finished(&mut self, report: &ExportReport);
}

/// Logging observer with an optional spinner
pub struct ProgressTracker {
    start_time: Instant,
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `enable_bar` - Whether to display a spinner on the terminal
    pub fn new(enable_bar: bool) -> Self {
        let bar = enable_bar.then(|| {
            let bar = ProgressBar::new_spinner();
            let style = ProgressStyle::default_spinner()
                .template("{spinner:.green} {pos} records {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(style);
            bar
        });

        Self {
            start_time: Instant::now(),
            bar,
        }
    }

    fn rate(&self, rows: u64) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            rows as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl ProgressObserver for ProgressTracker {
    fn on_page(&mut self, rows_processed: u64, _cursor: Cursor) {
        if let Some(ref bar) = self.bar {
            bar.set_position(rows_processed);
            bar.set_message(format!("({:.0} rows/sec)", self.rate(rows_processed)));
        }
    }

    fn on_progress(&mut self, rows_processed: u64) {
        info!("Processed {} rows...", rows_processed);
    }

    fn on_finished(&mut self, report: &ExportReport) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }

        if report.is_success() {
            info!(
                "Export complete. Rows processed: {} ({} ms)",
                report.rows_processed, report.elapsed_ms
            );
        } else {
            if let Some(ref fatal) = report.fatal {
                error!("Export failed: {}", fatal);
            }
            for failure in &report.failures {
                warn!("Commit failed: {}", failure);
            }
            error!(
                "Export finished unsuccessfully after {} rows",
                report.rows_processed
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_without_bar() {
        let mut tracker = ProgressTracker::new(false);
        tracker.on_page(500, Cursor::START);
        tracker.on_progress(25_000);
        assert!(tracker.bar.is_none());
    }

    #[test]
    fn test_rate_is_non_negative() {
        let tracker = ProgressTracker::new(false);
        assert!(tracker.rate(100) >= 0.0);
    }
}
