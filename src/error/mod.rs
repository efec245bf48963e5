//! Error handling for export runs.
//!
//! The exporter distinguishes three failure classes:
//! - Source errors: the page fetch failed; fatal for the run
//! - Write errors: an output stream could not be opened or appended to; fatal
//! - Commit errors: one destination could not be finalized; recorded per
//!   destination, never fatal
//!
//! Fatal errors stop pagination but never skip teardown.

pub mod kinds;

// Re-export commonly used types
pub use kinds::{
    CommitError, CommitStage, ConfigError, ExportError, Result, SourceError, WriteError,
};
