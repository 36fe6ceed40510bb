use std::collections::HashMap;

use serde_json::value::RawValue;

use super::error::{DecodeError, FieldError};
use super::field::is_null;
use crate::contract::TypeDescriptor;
use crate::micheline::{OnError, ValueDecodeError};

/// Assigns one parsed column value to a record.
pub type FieldSetter<R> = fn(&mut R, &RawValue) -> Result<(), FieldError>;

/// A record type that can be decoded from indexer rows.
pub trait TableRecord: Default + Send + Sized + 'static {
    /// Static dispatch table, built once per type.
    fn column_table() -> &'static ColumnTable<Self>;

    fn row_id(&self) -> u64;

    /// Contract whose types decode this row's contract values, if any.
    fn script_address(&self) -> Option<&str> {
        None
    }

    /// Decodes raw contract values kept by the row. Without a descriptor
    /// values decode into primitive-only trees.
    fn decode_contract_values(
        &mut self,
        _descriptor: Option<&TypeDescriptor>,
        _on_error: OnError,
    ) -> Result<(), ValueDecodeError> {
        Ok(())
    }
}

/// A record served by a `tables/<name>.<format>` endpoint.
pub trait QueryTable: TableRecord {
    const TABLE: &'static str;
}

/// Field-name to setter table for one record type.
///
/// Columns are kept in declaration order, which is also the order of the
/// default projection. Columns marked notable are excluded from that
/// projection because they are expensive to produce server side.
pub struct ColumnTable<R> {
    setters: HashMap<&'static str, FieldSetter<R>>,
    columns: Vec<&'static str>,
    notable: Vec<&'static str>,
}

impl<R> ColumnTable<R> {
    pub fn builder() -> ColumnTableBuilder<R> {
        ColumnTableBuilder {
            table: ColumnTable {
                setters: HashMap::new(),
                columns: Vec::new(),
                notable: Vec::new(),
            },
        }
    }

    pub fn setter(&self, column: &str) -> Option<FieldSetter<R>> {
        self.setters.get(column).copied()
    }

    /// All known columns in declaration order.
    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    pub fn is_notable(&self, column: &str) -> bool {
        self.notable.iter().any(|n| *n == column)
    }

    /// Columns requested when the caller does not choose a projection.
    pub fn default_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !self.is_notable(c))
            .map(|c| c.to_string())
            .collect()
    }

    pub fn all_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.to_string()).collect()
    }

    /// Resolves a column schema to positional setters once per query.
    pub fn bind(&self, columns: &[String]) -> BoundColumns<R> {
        let unknown: Vec<&str> = columns
            .iter()
            .filter(|c| !self.setters.contains_key(c.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            tracing::trace!("ignoring unknown columns {:?}", unknown);
        }
        BoundColumns {
            slots: columns
                .iter()
                .map(|c| (c.clone(), self.setter(c)))
                .collect(),
        }
    }

    /// Applies every present field of an object row.
    pub fn apply_object(&self, record: &mut R, fields: &HashMap<String, &RawValue>) -> Result<(), DecodeError> {
        for (name, raw) in fields {
            if is_null(raw) {
                continue;
            }
            if let Some(setter) = self.setter(name) {
                setter(record, raw).map_err(|e| DecodeError::column(name, raw.get(), e))?;
            }
        }
        Ok(())
    }
}

pub struct ColumnTableBuilder<R> {
    table: ColumnTable<R>,
}

impl<R> ColumnTableBuilder<R> {
    pub fn field(mut self, name: &'static str, setter: FieldSetter<R>) -> Self {
        if self.table.setters.insert(name, setter).is_none() {
            self.table.columns.push(name);
        }
        self
    }

    /// Accepts `name` as another spelling of an existing column without
    /// listing it in the projection.
    pub fn alias(mut self, name: &'static str, setter: FieldSetter<R>) -> Self {
        self.table.setters.insert(name, setter);
        self
    }

    /// A field that is only returned when explicitly requested. Notable
    /// columns are left out of the default projection.
    pub fn notable(mut self, name: &'static str, setter: FieldSetter<R>) -> Self {
        self = self.field(name, setter);
        self.table.notable.push(name);
        self
    }

    pub fn build(self) -> ColumnTable<R> {
        self.table
    }
}

/// A column schema bound to setters of one record type.
pub struct BoundColumns<R> {
    slots: Vec<(String, Option<FieldSetter<R>>)>,
}

impl<R> BoundColumns<R> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|(name, _)| name.as_str())
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.slots.iter().position(|(name, _)| name == column)
    }

    /// Applies positional values to `record`.
    ///
    /// Fewer values than columns is an error; extra trailing values are
    /// ignored. `null` leaves the field at its current value.
    pub fn apply(&self, record: &mut R, values: &[&RawValue]) -> Result<(), DecodeError> {
        if values.len() < self.slots.len() {
            return Err(DecodeError::Truncated {
                columns: self.slots.len(),
                values: values.len(),
            });
        }
        for ((name, setter), raw) in self.slots.iter().zip(values) {
            let Some(setter) = setter else {
                continue;
            };
            if is_null(raw) {
                continue;
            }
            setter(record, raw).map_err(|e| DecodeError::column(name, raw.get(), e))?;
        }
        Ok(())
    }
}

impl<R> Clone for BoundColumns<R> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<R> std::fmt::Debug for BoundColumns<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|(name, setter)| (name, setter.is_some())))
            .finish()
    }
}
