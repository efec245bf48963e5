//! Per-destination output stream
//!
//! A [`StreamWriter`] owns one temp file `<out>/<file>.tmp`. Lines are
//! collected in an in-memory buffer; once the buffer reaches its high-water
//! mark the writer reports [`Backpressure::Saturated`] and the caller must
//! [`drain`](StreamWriter::drain) before handing it the next line. Nothing is
//! visible under the final file name until [`commit`](StreamWriter::commit)
//! has flushed, synced and closed the temp file and renamed it into place.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::error::{CommitError, CommitStage, WriteError};

use super::destination::{Destination, DestinationKey};

/// Columns that precede every destination's own columns
pub const PREFIX_COLUMNS: [&str; 2] = ["assayId", "fbId"];

/// Default buffer size at which a writer asks the caller to drain
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024;

const BYTE_ORDER_MARK: &[u8] = "\u{FEFF}".as_bytes();
const LINE_TERMINATOR: &[u8] = b"\r\n";
/// Suffix of the in-progress artifact next to each final file
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

/// Options shared by all writers of a run
#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    /// Buffered bytes at which the writer reports saturation
    pub high_water_mark: usize,
    /// Prefix the file with a UTF-8 byte-order mark
    pub byte_order_mark: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            byte_order_mark: true,
        }
    }
}

/// Whether a writer can take another line right away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    Ready,
    /// The caller must drain before writing again
    Saturated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Open,
    Committed,
    Aborted,
    Failed,
}

/// Buffered writer for one destination's temp file
pub struct StreamWriter {
    key: DestinationKey,
    /// Open handle; taken when the stream is closed
    file: Option<File>,
    buffer: Vec<u8>,
    high_water_mark: usize,
    temp_path: PathBuf,
    final_path: PathBuf,
    header_written: bool,
    pending_drain: bool,
    /// Set once a write failed; the file may end in a torn line
    poisoned: bool,
    lines_written: u64,
    bytes_written: u64,
    drains: u64,
    stage: Stage,
}

/// Temp artifact path for a destination
pub fn temp_path_for(output_dir: &Path, destination: &Destination) -> PathBuf {
    output_dir.join(format!("{}{}", destination.filename, TEMP_SUFFIX))
}

/// Header line for a destination, without terminator
pub fn header_line(destination: &Destination) -> String {
    PREFIX_COLUMNS
        .iter()
        .copied()
        .chain(destination.columns.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(",")
}

impl StreamWriter {
    /// Create the temp file and write the byte-order mark and header
    ///
    /// The header is flushed right away so an unwritable output directory
    /// fails here rather than on the first data line.
    ///
    /// # Arguments
    /// * `output_dir` - Existing directory for temp and final files
    /// * `destination` - Destination this stream serves
    /// * `options` - Buffering and BOM options
    ///
    /// # Returns
    /// * `Result<Self, WriteError>` - Open writer or error
    pub async fn open(
        output_dir: &Path,
        destination: &Destination,
        options: WriterOptions,
    ) -> Result<Self, WriteError> {
        let temp_path = temp_path_for(output_dir, destination);
        let final_path = output_dir.join(&destination.filename);

        let file = File::create(&temp_path)
            .await
            .map_err(|source| WriteError::Open {
                destination: destination.key.to_string(),
                path: temp_path.clone(),
                source,
            })?;

        let mut writer = Self {
            key: destination.key.clone(),
            file: Some(file),
            buffer: Vec::with_capacity(options.high_water_mark.max(1)),
            high_water_mark: options.high_water_mark.max(1),
            temp_path,
            final_path,
            header_written: false,
            pending_drain: false,
            poisoned: false,
            lines_written: 0,
            bytes_written: 0,
            drains: 0,
            stage: Stage::Open,
        };

        if options.byte_order_mark {
            writer.buffer.extend_from_slice(BYTE_ORDER_MARK);
        }
        writer.buffer.extend_from_slice(header_line(destination).as_bytes());
        writer.buffer.extend_from_slice(LINE_TERMINATOR);

        if let Err(source) = writer.flush_buffer().await {
            writer.stage = Stage::Failed;
            return Err(WriteError::Open {
                destination: writer.key.to_string(),
                path: writer.temp_path.clone(),
                source,
            });
        }
        writer.header_written = true;

        debug!(
            "Opened stream for '{}' at {}",
            writer.key,
            writer.temp_path.display()
        );
        Ok(writer)
    }

    /// Append one line; CRLF is added here
    ///
    /// Drains first if the previous call reported saturation, so at most one
    /// line beyond the high-water mark is ever pending.
    pub async fn write_line(&mut self, line: &str) -> Result<Backpressure, WriteError> {
        if self.pending_drain {
            self.drain().await?;
        }

        self.buffer.extend_from_slice(line.as_bytes());
        self.buffer.extend_from_slice(LINE_TERMINATOR);
        self.lines_written += 1;

        if self.buffer.len() >= self.high_water_mark {
            self.pending_drain = true;
            trace!(
                "Stream for '{}' saturated at {} buffered bytes",
                self.key,
                self.buffer.len()
            );
            Ok(Backpressure::Saturated)
        } else {
            Ok(Backpressure::Ready)
        }
    }

    /// Hand the buffered bytes to the file, suspending until it accepts them
    pub async fn drain(&mut self) -> Result<(), WriteError> {
        let was_saturated = self.pending_drain;
        self.flush_buffer().await.map_err(|source| WriteError::Line {
            destination: self.key.to_string(),
            path: self.temp_path.clone(),
            source,
        })?;
        if was_saturated {
            self.drains += 1;
        }
        Ok(())
    }

    /// Flush, sync, close and rename the temp file to its final name
    ///
    /// # Returns
    /// * `Result<PathBuf, CommitError>` - Final path, or the failed step.
    ///   On failure the final path is left untouched.
    pub async fn commit(mut self) -> Result<PathBuf, CommitError> {
        match self.finish_commit().await {
            Ok(()) => {
                self.stage = Stage::Committed;
                debug!(
                    "Committed '{}' ({} lines, {} bytes) to {}",
                    self.key,
                    self.lines_written,
                    self.bytes_written,
                    self.final_path.display()
                );
                Ok(self.final_path.clone())
            }
            Err((stage, source)) => {
                self.stage = Stage::Failed;
                let path = match stage {
                    CommitStage::Rename => self.final_path.clone(),
                    CommitStage::Flush | CommitStage::Sync => self.temp_path.clone(),
                };
                Err(CommitError {
                    destination: self.key.to_string(),
                    stage,
                    path,
                    source,
                })
            }
        }
    }

    /// Flush and close without renaming; the temp file stays for diagnosis
    ///
    /// A poisoned writer drops its pending buffer instead of retrying it, so
    /// the temp file holds exactly what reached the disk before the failure.
    ///
    /// # Returns
    /// * `Result<PathBuf, CommitError>` - Path of the temp artifact
    pub async fn abort_cleanup(mut self) -> Result<PathBuf, CommitError> {
        let flushed = if self.poisoned {
            self.buffer.clear();
            Ok(())
        } else {
            self.flush_buffer().await
        };
        // Closing happens regardless of the flush outcome
        self.file.take();
        self.stage = Stage::Aborted;

        match flushed {
            Ok(()) => {
                debug!(
                    "Left '{}' unpublished at {}",
                    self.key,
                    self.temp_path.display()
                );
                Ok(self.temp_path.clone())
            }
            Err(source) => Err(CommitError {
                destination: self.key.to_string(),
                stage: CommitStage::Flush,
                path: self.temp_path.clone(),
                source,
            }),
        }
    }

    async fn finish_commit(&mut self) -> Result<(), (CommitStage, io::Error)> {
        self.flush_buffer()
            .await
            .map_err(|e| (CommitStage::Flush, e))?;

        let Some(mut file) = self.file.take() else {
            return Err((CommitStage::Flush, closed_stream_error()));
        };
        file.flush().await.map_err(|e| (CommitStage::Flush, e))?;
        file.sync_all().await.map_err(|e| (CommitStage::Sync, e))?;
        drop(file);

        fs::rename(&self.temp_path, &self.final_path)
            .await
            .map_err(|e| (CommitStage::Rename, e))
    }

    /// Write the buffer and wait until the file has accepted it
    ///
    /// Any failure poisons the writer; a poisoned writer never writes again.
    async fn flush_buffer(&mut self) -> io::Result<()> {
        if self.poisoned {
            return Err(poisoned_stream_error());
        }
        let Some(file) = self.file.as_mut() else {
            return Err(closed_stream_error());
        };
        if !self.buffer.is_empty() {
            // tokio reports a failed write on the next operation, so flush
            // to surface it here
            let written = match file.write_all(&self.buffer).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                self.poisoned = true;
                return Err(e);
            }
            self.bytes_written += self.buffer.len() as u64;
            self.buffer.clear();
        }
        self.pending_drain = false;
        Ok(())
    }

    pub fn key(&self) -> &DestinationKey {
        &self.key
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    /// Whether the next write has to wait for a drain
    pub fn is_saturated(&self) -> bool {
        self.pending_drain
    }

    /// Whether a write failed; such a writer can only be aborted
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Data lines accepted so far, header excluded
    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Number of times the writer had to be drained after saturating
    pub fn drain_count(&self) -> u64 {
        self.drains
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if self.stage == Stage::Open {
            warn!(
                "Stream for '{}' dropped before commit; partial output left at {}",
                self.key,
                self.temp_path.display()
            );
        }
    }
}

fn closed_stream_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "output stream already closed")
}

fn poisoned_stream_error() -> io::Error {
    io::Error::other("output stream failed earlier; refusing to write again")
}

#[cfg(test)]
impl StreamWriter {
    /// Swap the open handle, e.g. for one that rejects writes
    pub(crate) fn replace_file(&mut self, file: File) {
        self.file = Some(file);
    }
}
