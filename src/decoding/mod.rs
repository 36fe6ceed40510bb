//! Column dispatch decoding.
//!
//! The indexer returns the same records in two shapes:
//!
//! - object rows (`{"height": 1, ...}`) from explorer endpoints, and
//! - positional rows (`[1, "BL..", ...]`) from table endpoints and the push
//!   feed, aligned with the column list of the request.
//!
//! Both shapes go through one static field table per record type (see
//! [`TableRecord`]), so each field is parsed by exactly one setter. The
//! column list is bound to setters once per query ([`BoundColumns`]) and
//! then applied to every row.

pub mod error;
pub mod field;
pub mod table;

use std::collections::HashMap;

use serde_json::value::RawValue;

pub use error::{DecodeError, FieldError};
pub use field::{hex_bytes, set, set_json, FromField};
pub use table::{BoundColumns, ColumnTable, ColumnTableBuilder, FieldSetter, QueryTable, TableRecord};

fn leading_byte(data: &str) -> Option<u8> {
    data.bytes().find(|b| !b.is_ascii_whitespace())
}

fn is_empty_payload(data: &str) -> bool {
    matches!(data.trim(), "" | "null" | "[]" | "{}")
}

fn is_empty_row(raw: &RawValue) -> bool {
    is_empty_payload(raw.get())
}

/// Decodes one row in either form into `record`.
///
/// An empty body, `null` and the two-byte empty markers `[]`/`{}` leave the
/// record untouched.
pub fn decode_into<R: TableRecord>(
    record: &mut R,
    columns: &BoundColumns<R>,
    data: &str,
) -> Result<(), DecodeError> {
    if is_empty_payload(data) {
        return Ok(());
    }
    match leading_byte(data) {
        Some(b'[') => {
            let values: Vec<&RawValue> = serde_json::from_str(data)?;
            columns.apply(record, &values)
        }
        Some(b'{') => decode_object_into(record, data),
        Some(other) => Err(DecodeError::UnexpectedForm {
            expected: "array or object",
            found: other as char,
        }),
        None => Ok(()),
    }
}

/// Decodes an object row; every present known field is set.
pub fn decode_object_into<R: TableRecord>(record: &mut R, data: &str) -> Result<(), DecodeError> {
    let fields: HashMap<String, &RawValue> = serde_json::from_str(data)?;
    R::column_table().apply_object(record, &fields)
}

pub fn decode_row<R: TableRecord>(columns: &BoundColumns<R>, data: &str) -> Result<R, DecodeError> {
    let mut record = R::default();
    decode_into(&mut record, columns, data)?;
    Ok(record)
}

/// Like [`decode_row`], but maps the empty markers to `None`.
///
/// Endpoints returning a nullable aggregate send `[]` when nothing exists.
pub fn decode_optional<R: TableRecord>(
    columns: &BoundColumns<R>,
    data: &str,
) -> Result<Option<R>, DecodeError> {
    if is_empty_payload(data) {
        return Ok(None);
    }
    decode_row(columns, data).map(Some)
}

/// Splits a top-level JSON array into its raw elements.
pub fn split_array(data: &str) -> Result<Vec<&RawValue>, DecodeError> {
    match leading_byte(data) {
        Some(b'[') => Ok(serde_json::from_str(data)?),
        Some(other) => Err(DecodeError::UnexpectedForm {
            expected: "array",
            found: other as char,
        }),
        None => Ok(Vec::new()),
    }
}

/// Decodes a list of rows; each element may be positional or an object.
/// `null` and empty elements carry no row and are skipped, so they never
/// reach the cursor.
pub fn decode_list<R: TableRecord>(columns: &BoundColumns<R>, data: &str) -> Result<RowList<R>, DecodeError> {
    let rows = split_array(data)?;
    let mut list = RowList::with_capacity(rows.len());
    for raw in rows {
        if is_empty_row(raw) {
            continue;
        }
        list.rows.push(decode_row(columns, raw.get())?);
    }
    Ok(list)
}

/// Decodes an embedded record, e.g. the status inside the tip.
pub fn set_record<R: TableRecord>(slot: &mut R, raw: &RawValue) -> Result<(), FieldError> {
    decode_object_into(slot, raw.get()).map_err(|e| FieldError::Nested(Box::new(e)))
}

/// Decodes an embedded list of records, e.g. the operations of a block.
pub fn set_records<R: TableRecord>(slot: &mut Vec<R>, raw: &RawValue) -> Result<(), FieldError> {
    let table = R::column_table();
    let columns = table.bind(&table.all_columns());
    *slot = decode_list(&columns, raw.get())
        .map_err(|e| FieldError::Nested(Box::new(e)))?
        .into_rows();
    Ok(())
}

/// Value of `column` in a positional row, by the bound schema.
pub fn row_value<'a, R>(columns: &BoundColumns<R>, values: &[&'a RawValue], column: &str) -> Option<&'a RawValue> {
    columns.position(column).and_then(|i| values.get(i).copied())
}

/// Decoded page of table rows.
#[derive(Debug, Clone)]
pub struct RowList<R> {
    rows: Vec<R>,
}

impl<R> Default for RowList<R> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<R> RowList<R> {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            rows: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [R] {
        &mut self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.rows.iter()
    }

    pub fn into_rows(self) -> Vec<R> {
        self.rows
    }

    pub(crate) fn push(&mut self, row: R) {
        self.rows.push(row);
    }
}

impl<R: TableRecord> RowList<R> {
    /// Row id of the last row, the cursor for the next page. Zero when empty.
    pub fn cursor(&self) -> u64 {
        self.rows.last().map(R::row_id).unwrap_or(0)
    }
}

impl<R> IntoIterator for RowList<R> {
    type Item = R;
    type IntoIter = std::vec::IntoIter<R>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a, R> IntoIterator for &'a RowList<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use chrono::{DateTime, Utc};

    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Sample {
        row_id: u64,
        hash: String,
        height: i64,
        time: DateTime<Utc>,
        is_orphan: bool,
        volume: f64,
        metadata: Option<serde_json::Value>,
    }

    impl TableRecord for Sample {
        fn column_table() -> &'static ColumnTable<Self> {
            static TABLE: OnceLock<ColumnTable<Sample>> = OnceLock::new();
            TABLE.get_or_init(|| {
                ColumnTable::<Sample>::builder()
                    .field("row_id", |r, v| set(&mut r.row_id, v))
                    .field("hash", |r, v| set(&mut r.hash, v))
                    .field("height", |r, v| set(&mut r.height, v))
                    .field("time", |r, v| set(&mut r.time, v))
                    .field("is_orphan", |r, v| set(&mut r.is_orphan, v))
                    .field("volume", |r, v| set(&mut r.volume, v))
                    .notable("metadata", |r, v| set_json(&mut r.metadata, v))
                    .build()
            })
        }

        fn row_id(&self) -> u64 {
            self.row_id
        }
    }

    fn bind(columns: &[&str]) -> BoundColumns<Sample> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        Sample::column_table().bind(&columns)
    }

    fn all() -> BoundColumns<Sample> {
        Sample::column_table().bind(&Sample::column_table().default_columns())
    }

    #[test]
    fn test_array_and_object_forms_match() {
        let array = r#"[55, "BLx", 100, 1600000000000, 1, 12.5]"#;
        let object = r#"{"row_id": 55, "hash": "BLx", "height": 100, "time": "2020-09-13T12:26:40Z", "is_orphan": true, "volume": 12.5}"#;
        let a: Sample = decode_row(&all(), array).unwrap();
        let b: Sample = decode_row(&all(), object).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.row_id, 55);
        assert!(a.is_orphan);
    }

    #[test]
    fn test_partial_projection_leaves_defaults() {
        let columns = bind(&["height", "row_id"]);
        let s: Sample = decode_row(&columns, "[7, 3]").unwrap();
        assert_eq!(s.height, 7);
        assert_eq!(s.row_id, 3);
        assert_eq!(s.hash, "");
        assert_eq!(s.volume, 0.0);
    }

    #[test]
    fn test_unknown_columns_and_nulls_ignored() {
        let columns = bind(&["row_id", "not_a_field", "hash"]);
        let s: Sample = decode_row(&columns, r#"[1, {"x": 1}, null]"#).unwrap();
        assert_eq!(s.row_id, 1);
        assert_eq!(s.hash, "");
    }

    #[test]
    fn test_truncated_row_errors() {
        let columns = bind(&["row_id", "hash", "height"]);
        let err = decode_row::<Sample>(&columns, r#"[1, "BL"]"#).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { columns: 3, values: 2 }));

        // extra trailing values are fine
        let s: Sample = decode_row(&bind(&["row_id"]), "[9, 10, 11]").unwrap();
        assert_eq!(s.row_id, 9);
    }

    #[test]
    fn test_column_error_names_column_and_value() {
        let columns = bind(&["row_id", "height"]);
        let err = decode_row::<Sample>(&columns, r#"[1, "tall"]"#).unwrap_err();
        assert_eq!(err.column_name(), Some("height"));
        assert!(err.to_string().contains("\"tall\""));
    }

    #[test]
    fn test_empty_markers_are_noops() {
        let mut s = Sample {
            row_id: 4,
            ..Default::default()
        };
        for data in ["", "null", "[]", "{}"] {
            decode_into(&mut s, &all(), data).unwrap();
            assert_eq!(s.row_id, 4);
        }
        assert_eq!(decode_optional(&all(), "[]").unwrap(), None);
        assert!(decode_optional(&all(), "[1]").is_err());
    }

    #[test]
    fn test_notable_columns_excluded_by_default() {
        let table = Sample::column_table();
        assert!(!table.default_columns().contains(&"metadata".to_string()));
        assert!(table.all_columns().contains(&"metadata".to_string()));
        assert!(table.is_notable("metadata"));
    }

    #[test]
    fn test_list_and_cursor() {
        let columns = bind(&["row_id", "height"]);
        let list = decode_list(&columns, "[[55, 101], null, [54, 100]]").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.cursor(), 54);
        assert_eq!(decode_list(&columns, "[]").unwrap().cursor(), 0);

        let list = decode_list(&columns, "[[55, 101], [], {}, [54, 100], []]").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.cursor(), 54);
        assert!(decode_list(&columns, "[[55, 101], 12]").is_err());

        let err = decode_list(&columns, r#"{"row_id": 1}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedForm { expected: "array", found: '{' }));
    }

    #[test]
    fn test_row_value_lookup() {
        let columns = bind(&["row_id", "hash"]);
        let values = split_array(r#"[1, "BLa"]"#).unwrap();
        assert_eq!(row_value(&columns, &values, "hash").unwrap().get(), "\"BLa\"");
        assert!(row_value(&columns, &values, "height").is_none());
    }
}
