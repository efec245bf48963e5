//! Source records and their identifiers

use std::collections::HashMap;
use std::fmt;

use super::cell::CellValue;

/// Primary key of a record; exported ids keep all 64 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub i64);

impl RecordId {
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId(id)
    }
}

/// One immutable row read from the source
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Exported as `assayId`
    pub id: RecordId,
    /// Exported as `fbId`
    pub foreign_key: CellValue,
    attributes: HashMap<String, CellValue>,
}

impl Record {
    pub fn new(id: i64, foreign_key: impl Into<CellValue>) -> Self {
        Self {
            id: RecordId(id),
            foreign_key: foreign_key.into(),
            attributes: HashMap::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with(mut self, column: &str, value: impl Into<CellValue>) -> Self {
        self.attributes.insert(column.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        self.attributes.insert(column.into(), value);
    }

    /// Value of an attribute column; `None` when the column is absent
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.attributes.get(column)
    }

    /// Whether the column holds a non-null value
    pub fn has_value(&self, column: &str) -> bool {
        self.get(column).is_some_and(|v| !v.is_null())
    }
}
