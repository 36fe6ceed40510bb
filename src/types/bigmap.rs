use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::client::{Client, ClientError};
use crate::contract::TypeDescriptor;
use crate::decoding::field::scalar_text;
use crate::decoding::{hex_bytes, set, ColumnTable, FieldError, FromField, QueryTable, TableRecord};
use crate::micheline::{decode_value, OnError, Prim, Value, ValueDecodeError};
use crate::query::ExplorerParams;

/// Kind of change recorded for a bigmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffAction {
    Alloc,
    #[default]
    Update,
    Remove,
    Copy,
}

impl DiffAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffAction::Alloc => "alloc",
            DiffAction::Update => "update",
            DiffAction::Remove => "remove",
            DiffAction::Copy => "copy",
        }
    }

    /// Alloc and copy entries carry the bigmap's types instead of a key/value.
    pub fn carries_types(&self) -> bool {
        matches!(self, DiffAction::Alloc | DiffAction::Copy)
    }
}

impl fmt::Display for DiffAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiffAction {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alloc" => Ok(DiffAction::Alloc),
            "update" => Ok(DiffAction::Update),
            "remove" => Ok(DiffAction::Remove),
            "copy" => Ok(DiffAction::Copy),
            other => Err(FieldError::UnknownValue {
                kind: "bigmap action",
                value: other.to_string(),
            }),
        }
    }
}

impl FromField for DiffAction {
    fn from_field(raw: &RawValue) -> Result<Self, FieldError> {
        scalar_text(raw)?.parse()
    }
}

fn decode_part(typ: Option<&Prim>, buf: &[u8], on_error: OnError) -> Result<Option<Value>, ValueDecodeError> {
    if buf.is_empty() {
        return Ok(None);
    }
    decode_value(typ, buf, on_error).map(Some)
}

fn decode_type(buf: &[u8]) -> Result<Option<Prim>, ValueDecodeError> {
    if buf.is_empty() {
        return Ok(None);
    }
    Prim::from_binary(buf).map(Some)
}

/// Bigmap summary from `/explorer/bigmap/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Bigmap {
    pub contract: String,
    pub bigmap_id: i64,
    pub n_updates: i64,
    pub n_keys: i64,
    pub alloc_height: i64,
    pub alloc_block: String,
    pub alloc_time: DateTime<Utc>,
    pub update_height: i64,
    pub update_block: String,
    pub update_time: DateTime<Utc>,
    /// Rendered type definitions.
    pub key_type: serde_json::Value,
    pub value_type: serde_json::Value,
    /// Primitive type trees, sent with `prim=1`.
    pub key_type_prim: Option<Prim>,
    pub value_type_prim: Option<Prim>,
}

/// Row of the `bigmaps` table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BigmapRow {
    pub row_id: u64,
    pub contract: String,
    pub account_id: u64,
    pub bigmap_id: i64,
    pub n_updates: i64,
    pub n_keys: i64,
    pub alloc_height: i64,
    pub alloc_time: DateTime<Utc>,
    pub alloc_block: String,
    pub update_height: i64,
    pub update_time: DateTime<Utc>,
    pub update_block: String,
    pub raw_key_type: Vec<u8>,
    pub raw_value_type: Vec<u8>,
}

impl BigmapRow {
    pub fn key_type(&self) -> Result<Option<Prim>, ValueDecodeError> {
        decode_type(&self.raw_key_type)
    }

    pub fn value_type(&self) -> Result<Option<Prim>, ValueDecodeError> {
        decode_type(&self.raw_value_type)
    }
}

impl QueryTable for BigmapRow {
    const TABLE: &'static str = "bigmaps";
}

impl TableRecord for BigmapRow {
    fn column_table() -> &'static ColumnTable<Self> {
        static TABLE: OnceLock<ColumnTable<BigmapRow>> = OnceLock::new();
        TABLE.get_or_init(|| {
            ColumnTable::<BigmapRow>::builder()
                .field("row_id", |r, v| set(&mut r.row_id, v))
                .field("contract", |r, v| set(&mut r.contract, v))
                .field("account_id", |r, v| set(&mut r.account_id, v))
                .field("bigmap_id", |r, v| set(&mut r.bigmap_id, v))
                .field("n_updates", |r, v| set(&mut r.n_updates, v))
                .field("n_keys", |r, v| set(&mut r.n_keys, v))
                .field("alloc_height", |r, v| set(&mut r.alloc_height, v))
                .field("alloc_time", |r, v| set(&mut r.alloc_time, v))
                .field("alloc_block", |r, v| set(&mut r.alloc_block, v))
                .field("update_height", |r, v| set(&mut r.update_height, v))
                .field("update_time", |r, v| set(&mut r.update_time, v))
                .field("update_block", |r, v| set(&mut r.update_block, v))
                .field("key_type", |r, v| {
                    r.raw_key_type = hex_bytes(v)?;
                    Ok(())
                })
                .field("value_type", |r, v| {
                    r.raw_value_type = hex_bytes(v)?;
                    Ok(())
                })
                .build()
        })
    }

    fn row_id(&self) -> u64 {
        self.row_id
    }
}

/// Row of the `bigmap_values` table: the live entries of all bigmaps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BigmapValueRow {
    pub row_id: u64,
    pub bigmap_id: i64,
    pub key_id: u64,
    pub key_hash: String,
    pub raw_key: Vec<u8>,
    pub raw_value: Vec<u8>,
    pub height: i64,
    pub time: DateTime<Utc>,
    pub key: Option<Value>,
    pub value: Option<Value>,
}

impl BigmapValueRow {
    /// Decodes key and value against explicit types, untyped when absent.
    pub fn decode_with(
        &mut self,
        key_type: Option<&Prim>,
        value_type: Option<&Prim>,
        on_error: OnError,
    ) -> Result<(), ValueDecodeError> {
        self.key = decode_part(key_type, &self.raw_key, on_error)?;
        self.value = decode_part(value_type, &self.raw_value, on_error)?;
        Ok(())
    }
}

impl QueryTable for BigmapValueRow {
    const TABLE: &'static str = "bigmap_values";
}

impl TableRecord for BigmapValueRow {
    fn column_table() -> &'static ColumnTable<Self> {
        static TABLE: OnceLock<ColumnTable<BigmapValueRow>> = OnceLock::new();
        TABLE.get_or_init(|| {
            ColumnTable::<BigmapValueRow>::builder()
                .field("row_id", |r, v| set(&mut r.row_id, v))
                .field("bigmap_id", |r, v| set(&mut r.bigmap_id, v))
                .field("key_id", |r, v| set(&mut r.key_id, v))
                .field("key_hash", |r, v| set(&mut r.key_hash, v))
                .field("key", |r, v| {
                    r.raw_key = hex_bytes(v)?;
                    Ok(())
                })
                .field("value", |r, v| {
                    r.raw_value = hex_bytes(v)?;
                    Ok(())
                })
                .field("height", |r, v| set(&mut r.height, v))
                .field("time", |r, v| set(&mut r.time, v))
                .build()
        })
    }

    fn row_id(&self) -> u64 {
        self.row_id
    }

    fn decode_contract_values(
        &mut self,
        descriptor: Option<&TypeDescriptor>,
        on_error: OnError,
    ) -> Result<(), ValueDecodeError> {
        let args = descriptor
            .and_then(|d| d.bigmap_type(self.bigmap_id))
            .map(Prim::args)
            .unwrap_or_default();
        self.decode_with(args.first(), args.get(1), on_error)
    }
}

/// Row of the `bigmap_updates` table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BigmapUpdateRow {
    pub row_id: u64,
    pub bigmap_id: i64,
    pub action: DiffAction,
    pub key_id: u64,
    pub hash: String,
    /// Key, or the key type for alloc and copy.
    pub raw_key: Vec<u8>,
    /// Value, or the value type for alloc and copy.
    pub raw_value: Vec<u8>,
    pub height: i64,
    pub time: DateTime<Utc>,
    pub key: Option<Value>,
    pub value: Option<Value>,
}

impl BigmapUpdateRow {
    /// Key type of an alloc or copy entry.
    pub fn key_type(&self) -> Result<Option<Prim>, ValueDecodeError> {
        if !self.action.carries_types() {
            return Ok(None);
        }
        decode_type(&self.raw_key)
    }

    /// Value type of an alloc or copy entry.
    pub fn value_type(&self) -> Result<Option<Prim>, ValueDecodeError> {
        if !self.action.carries_types() {
            return Ok(None);
        }
        decode_type(&self.raw_value)
    }

    /// Decodes key and value of an update or remove entry.
    pub fn decode_with(
        &mut self,
        key_type: Option<&Prim>,
        value_type: Option<&Prim>,
        on_error: OnError,
    ) -> Result<(), ValueDecodeError> {
        if self.action.carries_types() {
            return Ok(());
        }
        self.key = decode_part(key_type, &self.raw_key, on_error)?;
        self.value = decode_part(value_type, &self.raw_value, on_error)?;
        Ok(())
    }
}

impl QueryTable for BigmapUpdateRow {
    const TABLE: &'static str = "bigmap_updates";
}

impl TableRecord for BigmapUpdateRow {
    fn column_table() -> &'static ColumnTable<Self> {
        static TABLE: OnceLock<ColumnTable<BigmapUpdateRow>> = OnceLock::new();
        TABLE.get_or_init(|| {
            ColumnTable::<BigmapUpdateRow>::builder()
                .field("row_id", |r, v| set(&mut r.row_id, v))
                .field("bigmap_id", |r, v| set(&mut r.bigmap_id, v))
                .field("action", |r, v| set(&mut r.action, v))
                .field("key_id", |r, v| set(&mut r.key_id, v))
                .field("hash", |r, v| set(&mut r.hash, v))
                .field("key", |r, v| {
                    r.raw_key = hex_bytes(v)?;
                    Ok(())
                })
                .field("value", |r, v| {
                    r.raw_value = hex_bytes(v)?;
                    Ok(())
                })
                .field("height", |r, v| set(&mut r.height, v))
                .field("time", |r, v| set(&mut r.time, v))
                .build()
        })
    }

    fn row_id(&self) -> u64 {
        self.row_id
    }

    fn decode_contract_values(
        &mut self,
        descriptor: Option<&TypeDescriptor>,
        on_error: OnError,
    ) -> Result<(), ValueDecodeError> {
        let args = descriptor
            .and_then(|d| d.bigmap_type(self.bigmap_id))
            .map(Prim::args)
            .unwrap_or_default();
        self.decode_with(args.first(), args.get(1), on_error)
    }
}

/// Origin of a bigmap entry's latest change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BigmapMeta {
    pub contract: String,
    pub bigmap_id: i64,
    pub time: DateTime<Utc>,
    pub height: i64,
    pub op: String,
    pub sender: String,
    pub source: String,
}

/// Entry of a bigmap as served by the explorer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BigmapValue {
    /// Rendered key; a string for simple keys, an object for pairs.
    pub key: serde_json::Value,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<BigmapMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub height: i64,
    pub time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prim: Option<Prim>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_prim: Option<Prim>,
}

impl BigmapValue {
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.value.as_ref()?.get_value(path)
    }
}

/// One change of a bigmap as served by the explorer and inside operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BigmapUpdate {
    #[serde(flatten)]
    pub entry: BigmapValue,
    pub action: DiffAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type_prim: Option<Prim>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type_prim: Option<Prim>,
    pub bigmap_id: i64,
    #[serde(rename = "source_big_map")]
    pub source_id: i64,
    #[serde(rename = "destination_big_map")]
    pub destination_id: i64,
}

impl Client {
    pub async fn get_bigmap(&self, id: i64, params: &ExplorerParams) -> Result<Bigmap, ClientError> {
        self.get(params.append_to(&format!("explorer/bigmap/{}", id)))
            .await
    }

    pub async fn list_bigmap_values(&self, id: i64, params: &ExplorerParams) -> Result<Vec<BigmapValue>, ClientError> {
        self.get(params.append_to(&format!("explorer/bigmap/{}/values", id)))
            .await
    }

    /// Entry of bigmap `id` by key or key hash.
    pub async fn get_bigmap_value(
        &self,
        id: i64,
        key: &str,
        params: &ExplorerParams,
    ) -> Result<BigmapValue, ClientError> {
        self.get(params.append_to(&format!("explorer/bigmap/{}/{}", id, key)))
            .await
    }

    pub async fn list_bigmap_updates(&self, id: i64, params: &ExplorerParams) -> Result<Vec<BigmapUpdate>, ClientError> {
        self.get(params.append_to(&format!("explorer/bigmap/{}/updates", id)))
            .await
    }

    pub async fn list_bigmap_key_updates(
        &self,
        id: i64,
        key: &str,
        params: &ExplorerParams,
    ) -> Result<Vec<BigmapUpdate>, ClientError> {
        self.get(params.append_to(&format!("explorer/bigmap/{}/{}/updates", id, key)))
            .await
    }
}
