//! Record sources
//!
//! The exporter reads records through [`RecordSource`], a paged query keyed on
//! the record id. Two implementations are provided:
//! - [`MemorySource`]: records held in memory
//! - [`MongoRecordSource`]: a MongoDB collection read with range queries on
//!   the id field

use async_trait::async_trait;
use chrono::DateTime;
use futures::TryStreamExt;
use mongodb::Collection;
use mongodb::bson::{Bson, Document};
use tracing::debug;

use crate::error::SourceError;

use super::cell::CellValue;
use super::paginator::Cursor;
use super::record::{Record, RecordId};

/// Largest integer a double can carry without rounding
const MAX_EXACT_DOUBLE: f64 = 9_007_199_254_740_992.0;

/// Paged access to records ordered by id
#[async_trait]
pub trait RecordSource: Send {
    /// Fetch up to `limit` records with ids strictly greater than `after`,
    /// ascending by id. An empty page means the source is exhausted.
    async fn fetch_page(&mut self, after: Cursor, limit: u32) -> Result<Vec<Record>, SourceError>;

    /// Release any resources held by the source
    async fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Records held in memory, served in id order
#[derive(Debug, Default)]
pub struct MemorySource {
    records: Vec<Record>,
    queries: u64,
}

impl MemorySource {
    pub fn new(mut records: Vec<Record>) -> Self {
        records.sort_by_key(|r| r.id);
        Self { records, queries: 0 }
    }

    /// Number of `fetch_page` calls served
    pub fn queries(&self) -> u64 {
        self.queries
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn fetch_page(&mut self, after: Cursor, limit: u32) -> Result<Vec<Record>, SourceError> {
        self.queries += 1;
        let start = self.records.partition_point(|r| !after.admits(r.id));
        Ok(self.records[start..]
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// Range-query source over a MongoDB collection
///
/// Each page is `find({<id>: {$gt: cursor}}).sort({<id>: 1}).limit(n)`,
/// projected down to the id, the foreign key and the exported columns.
pub struct MongoRecordSource {
    collection: Collection<Document>,
    id_field: String,
    foreign_key_field: String,
    projection: Document,
}

impl MongoRecordSource {
    /// Create a source for a collection
    ///
    /// # Arguments
    /// * `collection` - Collection holding one document per record
    /// * `id_field` - Integer primary key field
    /// * `foreign_key_field` - Field exported as the foreign key
    /// * `columns` - Attribute columns to fetch
    pub fn new(
        collection: Collection<Document>,
        id_field: &str,
        foreign_key_field: &str,
        columns: &[&str],
    ) -> Self {
        let mut projection = Document::new();
        projection.insert("_id", 0);
        projection.insert(id_field, 1);
        projection.insert(foreign_key_field, 1);
        for column in columns {
            projection.insert(*column, 1);
        }

        Self {
            collection,
            id_field: id_field.to_string(),
            foreign_key_field: foreign_key_field.to_string(),
            projection,
        }
    }

    /// Convert one fetched document into a record
    fn to_record(&self, doc: Document) -> Result<Record, SourceError> {
        let id = match doc.get(&self.id_field) {
            Some(value) => record_id_from_bson(value).ok_or_else(|| SourceError::InvalidRecord {
                field: self.id_field.clone(),
                reason: format!("expected an integer id, found {value}"),
            })?,
            None => {
                return Err(SourceError::InvalidRecord {
                    field: self.id_field.clone(),
                    reason: "missing".to_string(),
                });
            }
        };

        let foreign_key = doc
            .get(&self.foreign_key_field)
            .map(bson_to_cell)
            .unwrap_or(CellValue::Null);

        let mut record = Record::new(id.value(), foreign_key);
        for (key, value) in &doc {
            if key != &self.id_field && key != &self.foreign_key_field && key != "_id" {
                record.insert(key.clone(), bson_to_cell(value));
            }
        }
        Ok(record)
    }
}

#[async_trait]
impl RecordSource for MongoRecordSource {
    async fn fetch_page(&mut self, after: Cursor, limit: u32) -> Result<Vec<Record>, SourceError> {
        let mut range = Document::new();
        range.insert("$gt", after.value());
        let mut filter = Document::new();
        filter.insert(self.id_field.as_str(), range);

        let mut sort = Document::new();
        sort.insert(self.id_field.as_str(), 1);

        let mut find_options = mongodb::options::FindOptions::default();
        find_options.sort = Some(sort);
        find_options.limit = Some(i64::from(limit));
        find_options.batch_size = Some(limit);
        find_options.projection = Some(self.projection.clone());

        let cursor = self.collection.find(filter).with_options(find_options).await?;
        let docs: Vec<Document> = cursor.try_collect().await?;

        debug!(
            "Fetched {} documents from '{}' after {}",
            docs.len(),
            self.collection.name(),
            after
        );

        docs.into_iter().map(|doc| self.to_record(doc)).collect()
    }
}

/// Integer id from BSON, refusing anything that would lose precision
fn record_id_from_bson(value: &Bson) -> Option<RecordId> {
    match value {
        Bson::Int32(n) => Some(RecordId(i64::from(*n))),
        Bson::Int64(n) => Some(RecordId(*n)),
        Bson::Double(f) if f.fract() == 0.0 && f.abs() <= MAX_EXACT_DOUBLE => {
            Some(RecordId(*f as i64))
        }
        _ => None,
    }
}

/// Map a BSON value onto the exporter's scalar model
pub fn bson_to_cell(value: &Bson) -> CellValue {
    match value {
        Bson::Null | Bson::Undefined => CellValue::Null,
        Bson::String(s) => CellValue::Text(s.clone()),
        Bson::Int32(n) => CellValue::Integer(i64::from(*n)),
        Bson::Int64(n) => CellValue::Integer(*n),
        Bson::Double(f) => CellValue::Float(*f),
        Bson::Decimal128(d) => CellValue::Decimal(d.to_string()),
        Bson::Boolean(b) => CellValue::Bool(*b),
        Bson::DateTime(dt) => DateTime::from_timestamp_millis(dt.timestamp_millis())
            .map(CellValue::Timestamp)
            .unwrap_or_else(|| CellValue::Text(dt.to_string())),
        Bson::ObjectId(oid) => CellValue::Text(oid.to_hex()),
        other => CellValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn records(ids: &[i64]) -> Vec<Record> {
        ids.iter().map(|id| Record::new(*id, "FB")).collect()
    }

    #[tokio::test]
    async fn test_memory_source_pages_after_cursor() {
        let mut source = MemorySource::new(records(&[5, 1, 3, 2, 4]));

        let page = source.fetch_page(Cursor::START, 2).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|r| r.id.value()).collect();
        assert_eq!(ids, vec![1, 2]);

        let page = source.fetch_page(Cursor::after(RecordId(2)), 10).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|r| r.id.value()).collect();
        assert_eq!(ids, vec![3, 4, 5]);

        let page = source.fetch_page(Cursor::after(RecordId(5)), 10).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(source.queries(), 3);
    }

    #[test]
    fn test_record_id_from_bson() {
        assert_eq!(record_id_from_bson(&Bson::Int32(7)), Some(RecordId(7)));
        assert_eq!(
            record_id_from_bson(&Bson::Int64(9_007_199_254_740_993)),
            Some(RecordId(9_007_199_254_740_993))
        );
        assert_eq!(record_id_from_bson(&Bson::Double(12.0)), Some(RecordId(12)));
        assert_eq!(record_id_from_bson(&Bson::Double(1.5)), None);
        assert_eq!(record_id_from_bson(&Bson::String("1".into())), None);
    }

    #[test]
    fn test_bson_to_cell() {
        assert_eq!(bson_to_cell(&Bson::Null), CellValue::Null);
        assert_eq!(bson_to_cell(&Bson::Int32(3)), CellValue::Integer(3));
        assert_eq!(bson_to_cell(&Bson::Double(0.5)), CellValue::Float(0.5));
        assert_eq!(bson_to_cell(&Bson::Boolean(false)), CellValue::Bool(false));
        assert_eq!(
            bson_to_cell(&Bson::String("x".into())),
            CellValue::Text("x".into())
        );

        let ts = Utc.with_ymd_and_hms(2023, 6, 30, 8, 0, 0).unwrap();
        let bson_ts = mongodb::bson::DateTime::from_millis(ts.timestamp_millis());
        assert_eq!(
            bson_to_cell(&Bson::DateTime(bson_ts)),
            CellValue::Timestamp(ts)
        );
    }
}
