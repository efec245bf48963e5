use std::path::PathBuf;
use std::{fmt, io};

/// Crate-wide `Result` type using [`ExportError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Top-level error type for export runs.
///
/// This type wraps more specific error kinds and provides a single
/// error type that can be used throughout the crate.
#[derive(Debug)]
pub enum ExportError {
    /// Page fetch failed or the source broke its ordering contract.
    Source(SourceError),

    /// Opening or appending to an output stream failed.
    Write(WriteError),

    /// Configuration errors.
    Config(ConfigError),

    /// The run was interrupted from outside before pagination finished.
    Interrupted,

    /// Generic error with a free-form message.
    Generic(String),
}

/// Errors raised while fetching pages from the record source.
#[derive(Debug)]
pub enum SourceError {
    /// The underlying query failed.
    QueryFailed(String),

    /// The MongoDB driver reported an error.
    Driver(mongodb::error::Error),

    /// A fetched row could not be turned into a record.
    InvalidRecord { field: String, reason: String },

    /// A page contained an id that does not advance the cursor.
    OutOfOrder { cursor: i64, id: i64 },

    /// A page contained more rows than requested.
    PageOverflow { limit: u32, received: usize },

    /// No client is available.
    NotConnected,
}

/// Errors raised by an open output stream.
#[derive(Debug)]
pub enum WriteError {
    /// Creating the temp file or writing its header failed.
    Open {
        destination: String,
        path: PathBuf,
        source: io::Error,
    },

    /// Appending a line failed.
    Line {
        destination: String,
        path: PathBuf,
        source: io::Error,
    },
}

/// Step of the commit sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStage {
    Flush,
    Sync,
    Rename,
}

/// Failure to finalize a single destination.
///
/// Recorded per destination; never stops the remaining destinations from
/// being finalized.
#[derive(Debug)]
pub struct CommitError {
    pub destination: String,
    pub stage: CommitStage,
    pub path: PathBuf,
    pub source: io::Error,
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },

    /// The destination list is unusable.
    InvalidDestination(String),
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Source(e) => write!(f, "Source query error: {e}"),
            ExportError::Write(e) => write!(f, "Write error: {e}"),
            ExportError::Config(e) => write!(f, "Configuration error: {e}"),
            ExportError::Interrupted => write!(f, "Export interrupted"),
            ExportError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::QueryFailed(msg) => write!(f, "Query failed: {msg}"),
            SourceError::Driver(e) => write!(f, "MongoDB error: {e}"),
            SourceError::InvalidRecord { field, reason } => {
                write!(f, "Invalid record field '{field}': {reason}")
            }
            SourceError::OutOfOrder { cursor, id } => {
                write!(f, "Record id {id} does not advance past cursor {cursor}")
            }
            SourceError::PageOverflow { limit, received } => {
                write!(f, "Page of {received} records exceeds limit {limit}")
            }
            SourceError::NotConnected => write!(f, "Not connected to the record source"),
        }
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Open {
                destination,
                path,
                source,
            } => write!(
                f,
                "Failed to open '{destination}' at {}: {source}",
                path.display()
            ),
            WriteError::Line {
                destination,
                path,
                source,
            } => write!(
                f,
                "Failed to write '{destination}' to {}: {source}",
                path.display()
            ),
        }
    }
}

impl fmt::Display for CommitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitStage::Flush => write!(f, "flush"),
            CommitStage::Sync => write!(f, "sync"),
            CommitStage::Rename => write!(f, "rename"),
        }
    }
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' failed to {} {}: {}",
            self.destination,
            self.stage,
            self.path.display(),
            self.source
        )
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
            ConfigError::InvalidDestination(msg) => write!(f, "Invalid destination: {msg}"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Source(e) => Some(e),
            ExportError::Write(e) => Some(e),
            ExportError::Config(e) => Some(e),
            ExportError::Interrupted | ExportError::Generic(_) => None,
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Driver(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::Open { source, .. } | WriteError::Line { source, .. } => Some(source),
        }
    }
}

impl std::error::Error for CommitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/* ========================= Conversions to ExportError ========================= */

impl From<SourceError> for ExportError {
    fn from(err: SourceError) -> Self {
        ExportError::Source(err)
    }
}

impl From<WriteError> for ExportError {
    fn from(err: WriteError) -> Self {
        ExportError::Write(err)
    }
}

impl From<ConfigError> for ExportError {
    fn from(err: ConfigError) -> Self {
        ExportError::Config(err)
    }
}

impl From<mongodb::error::Error> for SourceError {
    fn from(err: mongodb::error::Error) -> Self {
        SourceError::Driver(err)
    }
}

impl From<mongodb::error::Error> for ExportError {
    fn from(err: mongodb::error::Error) -> Self {
        ExportError::Source(err.into())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::InvalidFormat(err.to_string())
    }
}
