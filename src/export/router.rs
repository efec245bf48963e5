//! Record routing
//!
//! Decides, for one record, which destinations receive a line. A destination
//! gets a line only when at least one of its columns holds a value.

use super::cell::{encode, encode_optional};
use super::destination::Destination;
use super::record::Record;

/// A line bound for one destination
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedLine<'a> {
    /// Position of the destination in the slice passed to `route`
    pub slot: usize,
    pub destination: &'a Destination,
    /// Encoded cells joined by commas, without line terminator
    pub line: String,
}

/// Stateless fan-out of records to destinations
pub struct RecordRouter;

impl RecordRouter {
    /// Route one record
    ///
    /// # Arguments
    /// * `record` - Record to route
    /// * `destinations` - Candidate destinations in output order
    ///
    /// # Returns
    /// * `Vec<RoutedLine>` - Zero or more lines, in destination order
    pub fn route<'a>(record: &Record, destinations: &'a [Destination]) -> Vec<RoutedLine<'a>> {
        destinations
            .iter()
            .enumerate()
            .filter(|(_, dest)| Self::accepts(record, dest))
            .map(|(slot, destination)| RoutedLine {
                slot,
                destination,
                line: Self::build_line(record, destination),
            })
            .collect()
    }

    /// Whether any of the destination's columns is populated
    pub fn accepts(record: &Record, destination: &Destination) -> bool {
        destination.columns.iter().any(|c| record.has_value(c))
    }

    fn build_line(record: &Record, destination: &Destination) -> String {
        let mut cells = Vec::with_capacity(destination.columns.len() + 2);
        cells.push(encode(&record.id.value().into()));
        cells.push(encode(&record.foreign_key));
        cells.extend(
            destination
                .columns
                .iter()
                .map(|c| encode_optional(record.get(c))),
        );
        cells.join(",")
    }
}
