//! Streaming export of QC assay records into per-assay CSV files
//!
//! # Architecture
//!
//! 1. **RecordSource** / **CursorPaginator**: pull id-ordered pages, advancing
//!    a monotonic cursor
//! 2. **RecordRouter**: fan each record out to the destinations whose columns
//!    it populates
//! 3. **StreamWriter**: one buffered temp file per destination, with
//!    backpressure and atomic commit
//! 4. **ProgressObserver**: count-based progress and a final notification
//!
//! These components are orchestrated by the **ExportOrchestrator**, which
//! owns the run from opening writers to committing them.
//!
//! # Example
//!
//! ```no_run
//! use assay_export::export::{
//!     DestinationRegistry, ExportOptions, ExportOrchestrator, MemorySource, ProgressTracker,
//!     Record,
//! };
//!
//! # async fn run() {
//! let source = MemorySource::new(vec![Record::new(1, "FB-1").with("endotoxin", 0.2)]);
//! let mut coordinator = ExportOrchestrator::new(
//!     source,
//!     DestinationRegistry::qc_assays(),
//!     ExportOptions::default(),
//!     Box::new(ProgressTracker::new(false)),
//! );
//! let report = coordinator.execute().await;
//! assert!(!report.reversible);
//! # }
//! ```

pub mod cell;
pub mod coordinator;
pub mod destination;
pub mod paginator;
pub mod progress;
pub mod record;
pub mod router;
pub mod source;
pub mod writer;

pub use cell::{CellValue, encode};
pub use coordinator::{
    DestinationOutcome, DestinationSummary, ExportOptions, ExportOrchestrator, ExportReport,
    RunState,
};
pub use destination::{Destination, DestinationKey, DestinationRegistry};
pub use paginator::{Cursor, CursorPaginator};
pub use progress::{ProgressObserver, ProgressTracker};
pub use record::{Record, RecordId};
pub use router::{RecordRouter, RoutedLine};
pub use source::{MemorySource, MongoRecordSource, RecordSource};
pub use writer::{Backpressure, StreamWriter, WriterOptions};
