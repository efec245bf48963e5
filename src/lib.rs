//! QC Assay Export Library
//!
//! Streams QC report records out of a paged source and fans them into one
//! CSV file per assay. Files are written under a temporary name and renamed
//! into place at the end of the run.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `connection`: MongoDB connection management
//! - `error`: Error types and handling
//! - `export`: Pagination, routing, CSV writers and the run coordinator
//!
//! # Example
//!
//! ```no_run
//! use assay_export::{config::Config, connection::ConnectionManager, export::*};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let registry = config.registry()?;
//!     let mut manager = ConnectionManager::new(config.source.clone());
//!     manager.connect().await?;
//!
//!     let source = manager.record_source(&registry)?;
//!     let mut coordinator = ExportOrchestrator::new(
//!         source,
//!         registry,
//!         config.export_options(),
//!         Box::new(ProgressTracker::new(true)),
//!     );
//!     let report = coordinator.execute().await;
//!     println!("{} rows", report.rows_processed);
//!
//!     manager.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod export;

// Re-export commonly used types
pub use config::Config;
pub use connection::ConnectionManager;
pub use error::{ExportError, Result};
pub use export::{DestinationRegistry, ExportOrchestrator, ExportReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
