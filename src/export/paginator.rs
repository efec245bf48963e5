//! Cursor-based pagination over a record source
//!
//! The cursor is the id of the last record seen. Each page is requested with
//! ids strictly greater than the cursor, so no record is fetched twice. Pages
//! are checked before they are handed out: a source that returns too many
//! rows or rows that do not advance the cursor is reported as a source error.

use std::fmt;

use tracing::{debug, info};

use crate::error::SourceError;

use super::record::{Record, RecordId};
use super::source::RecordSource;

/// Position in the id key space; only ids above it are fetched next
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor(i64);

impl Cursor {
    /// Lowest cursor; admits every id except `i64::MIN` itself
    ///
    /// Pages are requested with a strict `>` on the id, so a record whose id
    /// is exactly `i64::MIN` is never fetched.
    pub const START: Cursor = Cursor(i64::MIN);

    /// Cursor positioned on `id`
    pub fn after(id: RecordId) -> Self {
        Cursor(id.value())
    }

    pub fn value(self) -> i64 {
        self.0
    }

    /// Whether `id` lies beyond this cursor
    pub fn admits(self, id: RecordId) -> bool {
        id.value() > self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Cursor::START {
            write!(f, "start")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Pulls ordered pages from a source, advancing a monotonic cursor
pub struct CursorPaginator<S> {
    source: S,
    cursor: Cursor,
    page_size: u32,
    pages_fetched: u64,
    records_fetched: u64,
    exhausted: bool,
}

impl<S: RecordSource> CursorPaginator<S> {
    /// Create a paginator positioned at the start of the key space
    ///
    /// # Arguments
    /// * `source` - Source to page through
    /// * `page_size` - Maximum records per page (at least 1)
    pub fn new(source: S, page_size: u32) -> Self {
        Self {
            source,
            cursor: Cursor::START,
            page_size: page_size.max(1),
            pages_fetched: 0,
            records_fetched: 0,
            exhausted: false,
        }
    }

    /// Fetch the next page
    ///
    /// # Returns
    /// * `Result<Option<Vec<Record>>, SourceError>` - Next page, or `None`
    ///   once the source returned an empty page
    pub async fn next_page(&mut self) -> Result<Option<Vec<Record>>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }

        debug!("Fetching page #{} after {}", self.pages_fetched + 1, self.cursor);
        let page = self.source.fetch_page(self.cursor, self.page_size).await?;
        validate_page(self.cursor, self.page_size, &page)?;

        let Some(last) = page.last() else {
            debug!(
                "Source exhausted after {} records in {} pages",
                self.records_fetched, self.pages_fetched
            );
            self.exhausted = true;
            return Ok(None);
        };

        self.cursor = Cursor::after(last.id);
        self.pages_fetched += 1;
        self.records_fetched += page.len() as u64;
        debug!(
            "Fetched page of {} records (total: {}, cursor: {})",
            page.len(),
            self.records_fetched,
            self.cursor
        );
        Ok(Some(page))
    }

    /// Close the underlying source
    pub async fn close(&mut self) -> Result<(), SourceError> {
        self.exhausted = true;
        self.source.close().await?;
        info!(
            "Closed paginator after {} records in {} pages",
            self.records_fetched, self.pages_fetched
        );
        Ok(())
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    pub fn records_fetched(&self) -> u64 {
        self.records_fetched
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

/// Check a page against the paging contract
///
/// # Arguments
/// * `cursor` - Cursor the page was requested after
/// * `limit` - Requested page size
/// * `page` - Records returned by the source
pub fn validate_page(cursor: Cursor, limit: u32, page: &[Record]) -> Result<(), SourceError> {
    if page.len() > limit as usize {
        return Err(SourceError::PageOverflow {
            limit,
            received: page.len(),
        });
    }

    let mut previous = cursor;
    for record in page {
        if !previous.admits(record.id) {
            return Err(SourceError::OutOfOrder {
                cursor: previous.value(),
                id: record.id.value(),
            });
        }
        previous = Cursor::after(record.id);
    }
    Ok(())
}
