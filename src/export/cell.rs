//! Cell values and CSV cell encoding
//!
//! Every value that leaves the exporter goes through [`encode`], which turns a
//! typed value into text that spreadsheet applications read back verbatim:
//! - Null becomes an empty cell
//! - Timestamps use a fixed ISO-8601 form
//! - Numbers keep every digit
//! - Text that could start a formula gets a leading `'`

use chrono::{DateTime, SecondsFormat, Utc};

/// Characters that start a formula in common spreadsheet applications
const FORMULA_TRIGGERS: [char; 4] = ['=', '+', '-', '@'];

/// A nullable scalar value read from the record source
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    /// Exact decimal text as delivered by the source
    Decimal(String),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl CellValue {
    /// Whether this value counts as absent
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Raw text of the value before quoting or guarding
    fn raw_text(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Integer(n) => n.to_string(),
            CellValue::Decimal(d) => d.clone(),
            // f64's Display never switches to exponent notation
            CellValue::Float(f) => f.to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Integer(n)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::Float(f)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for CellValue {
    fn from(ts: DateTime<Utc>) -> Self {
        CellValue::Timestamp(ts)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(CellValue::Null, Into::into)
    }
}

/// Encode a value as a single CSV cell
///
/// Total: every value produces a cell. The formula guard is decided on the
/// raw text, then the guarded text is quoted if it needs to be.
pub fn encode(value: &CellValue) -> String {
    let raw = value.raw_text();
    if raw.starts_with(FORMULA_TRIGGERS) {
        escape(&format!("'{raw}"))
    } else {
        escape(&raw)
    }
}

/// Encode an optional value, treating `None` as null
pub fn encode_optional(value: Option<&CellValue>) -> String {
    value.map(encode).unwrap_or_default()
}

/// Quote a cell if it contains a comma, quote or line break
///
/// # Arguments
/// * `value` - Value to escape
///
/// # Returns
/// * `String` - Escaped value
fn escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse_single_cell(line: &str) -> String {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(line.as_bytes());
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(record.len(), 1);
        record[0].to_string()
    }

    #[test]
    fn test_null_is_empty() {
        assert_eq!(encode(&CellValue::Null), "");
        assert_eq!(encode_optional(None), "");
    }

    #[test]
    fn test_plain_scalars() {
        assert_eq!(encode(&"simple".into()), "simple");
        assert_eq!(encode(&CellValue::Integer(42)), "42");
        assert_eq!(encode(&CellValue::Bool(true)), "true");
        assert_eq!(encode(&CellValue::Float(0.25)), "0.25");
    }

    #[test]
    fn test_numbers_keep_every_digit() {
        assert_eq!(encode(&CellValue::Integer(i64::MAX)), "9223372036854775807");
        assert_eq!(encode(&CellValue::Float(1e21)), "1000000000000000000000");
        assert_eq!(
            encode(&CellValue::Decimal("12345678901234567890.000001".to_string())),
            "12345678901234567890.000001"
        );
    }

    #[test]
    fn test_timestamp_is_iso8601_millis() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 9).unwrap();
        assert_eq!(encode(&ts.into()), "2024-03-01T12:05:09.000Z");
    }

    #[test]
    fn test_escaping() {
        assert_eq!(encode(&"with,comma".into()), "\"with,comma\"");
        assert_eq!(encode(&"with\"quote".into()), "\"with\"\"quote\"");
        assert_eq!(encode(&"with\nnewline".into()), "\"with\nnewline\"");
        assert_eq!(encode(&"with\rreturn".into()), "\"with\rreturn\"");
    }

    #[test]
    fn test_formula_guard() {
        assert_eq!(encode(&"=SUM(A1)".into()), "'=SUM(A1)");
        assert_eq!(encode(&"+1".into()), "'+1");
        assert_eq!(encode(&"@cmd".into()), "'@cmd");
        assert_eq!(encode(&CellValue::Integer(-5)), "'-5");
        assert_eq!(encode(&"=A1,B1".into()), "\"'=A1,B1\"");
        assert_eq!(encode(&"a=b".into()), "a=b");
    }

    #[test]
    fn test_round_trip_through_csv_reader() {
        for text in ["plain text", "x,y", "say \"hi\"", "two\nlines", "tab\there"] {
            let cell = encode(&text.into());
            assert_eq!(parse_single_cell(&cell), text);
        }
    }

    #[test]
    fn test_formula_reads_back_as_literal_text() {
        let cell = encode(&"=SUM(A1)".into());
        assert_eq!(parse_single_cell(&cell), "'=SUM(A1)");

        let cell = encode(&"=HYPERLINK(\"x\",\"y\")".into());
        assert_eq!(parse_single_cell(&cell), "'=HYPERLINK(\"x\",\"y\")");
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(CellValue::from(None::<i64>), CellValue::Null);
        assert_eq!(CellValue::from(Some(7i64)), CellValue::Integer(7));
    }
}
