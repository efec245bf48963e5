//! Export coordinator for orchestrating export runs
//!
//! This module brings together the paginator, the router and one stream
//! writer per destination. A run moves through these states:
//!
//! ```text
//! Init -> OpeningWriters -> Paginating -> Routing/Writing
//!      -> DrainingOnBackpressure -> ... -> Committing -> Done
//! ```
//!
//! Any source or write error moves the run to `Failed`, but teardown still
//! finalizes every writer that was opened.

use std::path::PathBuf;
use std::time::Instant;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{CommitError, ExportError, Result};

use super::destination::{DestinationKey, DestinationRegistry};
use super::paginator::{Cursor, CursorPaginator};
use super::progress::ProgressObserver;
use super::router::RecordRouter;
use super::source::RecordSource;
use super::writer::{Backpressure, StreamWriter, WriterOptions};

/// Default number of records requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 5000;

/// Default number of records between progress notifications
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 25_000;

/// Settings for one export run
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Existing directory that receives temp and final files
    pub output_dir: PathBuf,
    pub page_size: u32,
    pub progress_interval: u64,
    pub writer: WriterOptions,
    /// Publish what was written even when the run failed
    pub commit_on_failure: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("assay-exports"),
            page_size: DEFAULT_PAGE_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            writer: WriterOptions::default(),
            commit_on_failure: true,
        }
    }
}

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    OpeningWriters,
    Paginating,
    Routing,
    Writing,
    DrainingOnBackpressure,
    Committing,
    Done,
    Failed,
}

/// How a destination ended up after teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationOutcome {
    /// Published under its final name
    Committed(PathBuf),
    /// Closed but left under its temp name
    LeftTemporary(PathBuf),
    /// Finalizing failed; see the report's failures
    Failed,
}

/// Per-destination totals
#[derive(Debug, Clone)]
pub struct DestinationSummary {
    pub key: DestinationKey,
    pub lines_written: u64,
    pub drains: u64,
    pub outcome: DestinationOutcome,
}

/// Result of an export run
#[derive(Debug)]
pub struct ExportReport {
    /// Number of records read from the source
    pub rows_processed: u64,
    pub pages_fetched: u64,
    /// Cursor after the last page
    pub final_cursor: Cursor,
    pub destinations: Vec<DestinationSummary>,
    /// Destinations that could not be finalized
    pub failures: Vec<CommitError>,
    /// Error that stopped pagination, if any
    pub fatal: Option<ExportError>,
    pub state: RunState,
    pub elapsed_ms: u64,
    /// Always false: a run cannot be undone by this tool
    pub reversible: bool,
}

impl ExportReport {
    /// No fatal error and every destination finalized
    pub fn is_success(&self) -> bool {
        self.fatal.is_none() && self.failures.is_empty()
    }

    /// Final paths of all published files
    pub fn committed_paths(&self) -> Vec<&PathBuf> {
        self.destinations
            .iter()
            .filter_map(|d| match &d.outcome {
                DestinationOutcome::Committed(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self, key: &str) -> Option<&DestinationSummary> {
        self.destinations.iter().find(|d| d.key.as_str() == key)
    }
}

/// Coordinator for one export run
///
/// Owns the paginator, the destination registry and the observer; opens one
/// writer per destination, streams every record through the router, and
/// finalizes every writer on every exit path.
pub struct ExportOrchestrator<S> {
    registry: DestinationRegistry,
    paginator: CursorPaginator<S>,
    options: ExportOptions,
    observer: Box<dyn ProgressObserver>,
    cancel_token: Option<CancellationToken>,
    state: RunState,
    rows_processed: u64,
    milestones: u64,
}

impl<S: RecordSource> ExportOrchestrator<S> {
    /// Create a new coordinator
    pub fn new(
        source: S,
        registry: DestinationRegistry,
        options: ExportOptions,
        observer: Box<dyn ProgressObserver>,
    ) -> Self {
        let paginator = CursorPaginator::new(source, options.page_size);
        Self {
            registry,
            paginator,
            options,
            observer,
            cancel_token: None,
            state: RunState::Init,
            rows_processed: 0,
            milestones: 0,
        }
    }

    /// Set a token that interrupts the run from outside
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Execute the export run
    ///
    /// 1. Open one writer per destination (headers written)
    /// 2. Page through the source and route every record
    /// 3. Finalize every opened writer, whatever happened before
    ///
    /// # Returns
    /// * `ExportReport` - Totals, per-destination outcomes and any errors
    pub async fn execute(&mut self) -> ExportReport {
        let start_time = Instant::now();
        info!(
            "Starting export of {} destinations into {}",
            self.registry.len(),
            self.options.output_dir.display()
        );

        enter(&mut self.state, RunState::OpeningWriters);
        let (mut writers, mut fatal) = self.open_writers().await;

        if fatal.is_none() {
            if let Err(e) = self.pump(&mut writers).await {
                warn!("Stopping pagination: {}", e);
                fatal = Some(e);
            }
        }

        if let Err(e) = self.paginator.close().await {
            warn!("Failed to close record source: {}", e);
        }

        enter(&mut self.state, RunState::Committing);
        let (destinations, failures) = self.teardown(writers, fatal.is_some()).await;

        let next = if fatal.is_none() && failures.is_empty() {
            RunState::Done
        } else {
            RunState::Failed
        };
        enter(&mut self.state, next);

        let report = ExportReport {
            rows_processed: self.rows_processed,
            pages_fetched: self.paginator.pages_fetched(),
            final_cursor: self.paginator.cursor(),
            destinations,
            failures,
            fatal,
            state: self.state,
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            reversible: false,
        };
        self.observer.on_finished(&report);
        report
    }

    async fn open_writers(&self) -> (Vec<StreamWriter>, Option<ExportError>) {
        let mut writers = Vec::with_capacity(self.registry.len());
        for destination in self.registry.all() {
            match StreamWriter::open(&self.options.output_dir, destination, self.options.writer)
                .await
            {
                Ok(writer) => writers.push(writer),
                Err(e) => return (writers, Some(e.into())),
            }
        }
        (writers, None)
    }

    /// Main loop: one page at a time, every record routed before the next fetch
    async fn pump(&mut self, writers: &mut [StreamWriter]) -> Result<()> {
        let progress_interval = self.options.progress_interval.max(1);

        loop {
            enter(&mut self.state, RunState::Paginating);
            let next = match &self.cancel_token {
                Some(token) => {
                    if token.is_cancelled() {
                        return Err(ExportError::Interrupted);
                    }
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(ExportError::Interrupted),
                        page = self.paginator.next_page() => page?,
                    }
                }
                None => self.paginator.next_page().await?,
            };
            let Some(page) = next else {
                debug!("No more records available");
                break;
            };

            for record in &page {
                enter(&mut self.state, RunState::Routing);
                for routed in RecordRouter::route(record, self.registry.all()) {
                    enter(&mut self.state, RunState::Writing);
                    let writer = &mut writers[routed.slot];
                    if writer.write_line(&routed.line).await? == Backpressure::Saturated {
                        enter(&mut self.state, RunState::DrainingOnBackpressure);
                        writer.drain().await?;
                    }
                }
            }

            self.rows_processed += page.len() as u64;
            self.observer
                .on_page(self.rows_processed, self.paginator.cursor());

            let milestone = self.rows_processed / progress_interval;
            if milestone > self.milestones {
                self.milestones = milestone;
                self.observer.on_progress(self.rows_processed);
            }
        }

        Ok(())
    }

    /// Finalize every writer; one failure never stops the others
    ///
    /// A writer whose write failed is aborted rather than committed, since
    /// its temp file may end in a partial line.
    async fn teardown(
        &self,
        writers: Vec<StreamWriter>,
        failed: bool,
    ) -> (Vec<DestinationSummary>, Vec<CommitError>) {
        let publish = !failed || self.options.commit_on_failure;
        if !publish {
            info!("Run failed; leaving output under temporary names");
        }

        let outcomes = join_all(writers.into_iter().map(|writer| async move {
            let key = writer.key().clone();
            let lines_written = writer.lines_written();
            let drains = writer.drain_count();
            let result = if writer.is_poisoned() {
                warn!("Not publishing '{}' after a failed write", key);
                writer.abort_cleanup().await.map(DestinationOutcome::LeftTemporary)
            } else if publish {
                writer.commit().await.map(DestinationOutcome::Committed)
            } else {
                writer.abort_cleanup().await.map(DestinationOutcome::LeftTemporary)
            };
            (key, lines_written, drains, result)
        }))
        .await;

        let mut destinations = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (key, lines_written, drains, result) in outcomes {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Failed to finalize '{}': {}", key, e);
                    failures.push(e);
                    DestinationOutcome::Failed
                }
            };
            destinations.push(DestinationSummary {
                key,
                lines_written,
                drains,
                outcome,
            });
        }

        (destinations, failures)
    }
}

fn enter(state: &mut RunState, next: RunState) {
    if *state != next {
        trace!("Export state {:?} -> {:?}", state, next);
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CommitStage, SourceError};
    use crate::export::cell::CellValue;
    use crate::export::destination::Destination;
    use crate::export::record::Record;
    use crate::export::source::MemorySource;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Events {
        pages: Vec<u64>,
        progress: Vec<u64>,
        finished: usize,
    }

    struct RecordingObserver(Arc<Mutex<Events>>);

    impl ProgressObserver for RecordingObserver {
        fn on_page(&mut self, rows_processed: u64, _cursor: Cursor) {
            self.0.lock().unwrap().pages.push(rows_processed);
        }

        fn on_progress(&mut self, rows_processed: u64) {
            self.0.lock().unwrap().progress.push(rows_processed);
        }

        fn on_finished(&mut self, _report: &ExportReport) {
            self.0.lock().unwrap().finished += 1;
        }
    }

    /// Serves one good page, then fails
    struct FailingSource {
        served: bool,
    }

    #[async_trait]
    impl RecordSource for FailingSource {
        async fn fetch_page(
            &mut self,
            _after: Cursor,
            _limit: u32,
        ) -> std::result::Result<Vec<Record>, SourceError> {
            if self.served {
                return Err(SourceError::QueryFailed("connection reset".to_string()));
            }
            self.served = true;
            Ok(vec![Record::new(1, "FB-1").with("a1", 1i64)])
        }
    }

    fn registry() -> DestinationRegistry {
        DestinationRegistry::new(vec![
            Destination::new("A", "a.csv", &["a1", "a2"]),
            Destination::new("B", "b.csv", &["b1"]),
        ])
        .unwrap()
    }

    fn options(dir: &Path) -> ExportOptions {
        ExportOptions {
            output_dir: dir.to_path_buf(),
            ..ExportOptions::default()
        }
    }

    fn observer() -> (Box<dyn ProgressObserver>, Arc<Mutex<Events>>) {
        let events = Arc::new(Mutex::new(Events::default()));
        (Box::new(RecordingObserver(events.clone())), events)
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let content = std::fs::read_to_string(path).unwrap();
        let content = content.strip_prefix('\u{FEFF}').unwrap();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(content.as_bytes());
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_records_fan_out_by_populated_columns() {
        let dir = TempDir::new().unwrap();
        let source = MemorySource::new(vec![
            Record::new(1, "FB-1").with("a1", 0.5).with("b1", CellValue::Null),
            Record::new(2, "FB-2").with("b1", "x"),
            Record::new(3, "FB-3").with("a2", 7i64).with("b1", true),
        ]);
        let (observer, _) = observer();

        let mut coordinator =
            ExportOrchestrator::new(source, registry(), options(dir.path()), observer);
        let report = coordinator.execute().await;

        assert!(report.is_success());
        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.rows_processed, 3);
        assert!(!report.reversible);

        let a = read_rows(&dir.path().join("a.csv"));
        assert_eq!(a[0], vec!["assayId", "fbId", "a1", "a2"]);
        assert_eq!(a[1], vec!["1", "FB-1", "0.5", ""]);
        assert_eq!(a[2], vec!["3", "FB-3", "", "7"]);
        assert_eq!(a.len(), 3);

        let b = read_rows(&dir.path().join("b.csv"));
        assert_eq!(b[0], vec!["assayId", "fbId", "b1"]);
        assert_eq!(b[1], vec!["2", "FB-2", "x"]);
        assert_eq!(b[2], vec!["3", "FB-3", "true"]);
        assert_eq!(b.len(), 3);

        assert_eq!(report.summary("A").unwrap().lines_written, 2);
        assert_eq!(report.summary("B").unwrap().lines_written, 2);
        assert_eq!(file_names(dir.path()), vec!["a.csv", "b.csv"]);
    }

    #[tokio::test]
    async fn test_empty_source_yields_header_only_files() {
        let dir = TempDir::new().unwrap();
        let (observer, events) = observer();

        let mut coordinator = ExportOrchestrator::new(
            MemorySource::default(),
            registry(),
            options(dir.path()),
            observer,
        );
        let report = coordinator.execute().await;

        assert!(report.is_success());
        assert_eq!(report.rows_processed, 0);
        assert_eq!(report.final_cursor, Cursor::START);
        assert_eq!(report.committed_paths().len(), 2);
        assert_eq!(read_rows(&dir.path().join("a.csv")).len(), 1);
        assert_eq!(file_names(dir.path()), vec!["a.csv", "b.csv"]);
        assert_eq!(events.lock().unwrap().finished, 1);
    }

    #[tokio::test]
    async fn test_pages_and_progress_milestones() {
        let dir = TempDir::new().unwrap();
        let records = (1..=7)
            .map(|id| Record::new(id, "FB").with("b1", id))
            .collect();
        let (observer, events) = observer();
        let opts = ExportOptions {
            page_size: 3,
            progress_interval: 2,
            ..options(dir.path())
        };

        let mut coordinator =
            ExportOrchestrator::new(MemorySource::new(records), registry(), opts, observer);
        let report = coordinator.execute().await;

        assert!(report.is_success());
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.final_cursor.value(), 7);

        let events = events.lock().unwrap();
        assert_eq!(events.pages, vec![3, 6, 7]);
        assert_eq!(events.progress, vec![3, 6]);
        assert_eq!(events.finished, 1);
    }

    #[tokio::test]
    async fn test_backpressure_keeps_every_line() {
        let dir = TempDir::new().unwrap();
        let records = (1..=50)
            .map(|id| Record::new(id, format!("FB-{id}")).with("a1", id * 1000))
            .collect();
        let (observer, _) = observer();
        let mut opts = options(dir.path());
        opts.writer.high_water_mark = 32;
        opts.page_size = 8;

        let mut coordinator =
            ExportOrchestrator::new(MemorySource::new(records), registry(), opts, observer);
        let report = coordinator.execute().await;

        assert!(report.is_success());
        let summary = report.summary("A").unwrap();
        assert_eq!(summary.lines_written, 50);
        assert!(summary.drains > 0);

        let rows = read_rows(&dir.path().join("a.csv"));
        assert_eq!(rows.len(), 51);
        assert_eq!(rows[50], vec!["50", "FB-50", "50000", ""]);
    }

    #[tokio::test]
    async fn test_source_failure_still_commits() {
        let dir = TempDir::new().unwrap();
        let (observer, events) = observer();

        let mut coordinator = ExportOrchestrator::new(
            FailingSource { served: false },
            registry(),
            options(dir.path()),
            observer,
        );
        let report = coordinator.execute().await;

        assert!(!report.is_success());
        assert_eq!(report.state, RunState::Failed);
        assert!(matches!(report.fatal, Some(ExportError::Source(_))));
        assert_eq!(report.rows_processed, 1);
        assert!(report.failures.is_empty());

        assert_eq!(read_rows(&dir.path().join("a.csv")).len(), 2);
        assert_eq!(file_names(dir.path()), vec!["a.csv", "b.csv"]);
        assert_eq!(events.lock().unwrap().finished, 1);
    }

    #[tokio::test]
    async fn test_failure_without_commit_leaves_temp_files() {
        let dir = TempDir::new().unwrap();
        let (observer, _) = observer();
        let opts = ExportOptions {
            commit_on_failure: false,
            ..options(dir.path())
        };

        let mut coordinator =
            ExportOrchestrator::new(FailingSource { served: false }, registry(), opts, observer);
        let report = coordinator.execute().await;

        assert!(!report.is_success());
        assert!(report.committed_paths().is_empty());
        assert!(matches!(
            report.summary("A").unwrap().outcome,
            DestinationOutcome::LeftTemporary(_)
        ));
        assert_eq!(file_names(dir.path()), vec!["a.csv.tmp", "b.csv.tmp"]);
    }

    #[tokio::test]
    async fn test_commit_failure_is_isolated() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("a.csv");
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("occupied"), b"x").unwrap();

        let source = MemorySource::new(vec![
            Record::new(1, "FB-1").with("a1", 1i64).with("b1", 2i64),
        ]);
        let (observer, _) = observer();

        let mut coordinator =
            ExportOrchestrator::new(source, registry(), options(dir.path()), observer);
        let report = coordinator.execute().await;

        assert!(!report.is_success());
        assert!(report.fatal.is_none());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].destination, "A");
        assert_eq!(report.failures[0].stage, CommitStage::Rename);
        assert_eq!(report.summary("A").unwrap().outcome, DestinationOutcome::Failed);

        assert_eq!(read_rows(&dir.path().join("b.csv")).len(), 2);
        assert!(dir.path().join("a.csv.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_writer_stays_temporary() {
        let dir = TempDir::new().unwrap();
        let (observer, _) = observer();
        let mut opts = options(dir.path());
        opts.writer.high_water_mark = 1;
        let coordinator =
            ExportOrchestrator::new(MemorySource::default(), registry(), opts, observer);

        let (mut writers, fatal) = coordinator.open_writers().await;
        assert!(fatal.is_none());

        writers[0].write_line("1,FB-1,x,").await.unwrap();
        writers[0].drain().await.unwrap();
        let read_only = tokio::fs::File::open(writers[0].temp_path()).await.unwrap();
        writers[0].replace_file(read_only);
        writers[0].write_line("2,FB-2,y,").await.unwrap();
        assert!(writers[0].drain().await.is_err());
        writers[1].write_line("1,FB-1,z").await.unwrap();

        let (destinations, failures) = coordinator.teardown(writers, true).await;

        assert!(failures.is_empty());
        assert!(matches!(
            destinations[0].outcome,
            DestinationOutcome::LeftTemporary(_)
        ));
        assert!(matches!(
            destinations[1].outcome,
            DestinationOutcome::Committed(_)
        ));
        assert!(!dir.path().join("a.csv").exists());
        assert_eq!(read_rows(&dir.path().join("a.csv.tmp")).len(), 2);
        assert_eq!(read_rows(&dir.path().join("b.csv")).len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_tears_down() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let source = MemorySource::new(vec![Record::new(1, "FB").with("a1", 1i64)]);
        let (observer, _) = observer();

        let mut coordinator =
            ExportOrchestrator::new(source, registry(), options(dir.path()), observer)
                .with_cancellation(token);
        let report = coordinator.execute().await;

        assert!(matches!(report.fatal, Some(ExportError::Interrupted)));
        assert_eq!(report.rows_processed, 0);
        assert_eq!(coordinator.state(), RunState::Failed);
        assert_eq!(file_names(dir.path()), vec!["a.csv", "b.csv"]);
    }

    #[tokio::test]
    async fn test_unwritable_output_dir_fails_fast() {
        let dir = TempDir::new().unwrap();
        let (observer, _) = observer();
        let opts = options(&dir.path().join("missing"));
        let source = MemorySource::new(vec![Record::new(1, "FB").with("a1", 1i64)]);

        let mut coordinator = ExportOrchestrator::new(source, registry(), opts, observer);
        let report = coordinator.execute().await;

        assert!(matches!(report.fatal, Some(ExportError::Write(_))));
        assert_eq!(report.rows_processed, 0);
        assert!(report.destinations.is_empty());
        assert!(file_names(dir.path()).is_empty());
    }
}
