use std::fmt;
use std::str::FromStr;

use alloy_primitives::I256;
use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Deserializer, Serialize};

use super::prim::Prim;

/// Generic rendering of a decoded contract value.
///
/// Typed decoding produces named records; without type information the
/// tree only carries primitives (lists, ints, strings, bytes).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Unit,
    Bool(bool),
    Int(I256),
    String(String),
    Bytes(Vec<u8>),
    Address(String),
    Timestamp(DateTime<Utc>),
    Option(Option<Box<Value>>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Record(Vec<(String, Value)>),
    /// Code or values of types without a structured rendering (lambdas, tickets in raw form).
    Code(Prim),
    /// A nested value that failed to decode under the marking policy.
    Error(String),
}

impl Value {
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Looks up a nested value by dotted path (`ledger.0.amount`).
    ///
    /// Record fields match by name, list items by index, map entries by the
    /// rendered key. `Some` options are traversed transparently.
    pub fn get_value(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        if path.is_empty() {
            return Some(current);
        }
        for segment in path.split('.') {
            current = current.unwrap_option()?.child(segment)?;
        }
        current.unwrap_option()
    }

    fn unwrap_option(&self) -> Option<&Value> {
        match self {
            Value::Option(Some(inner)) => inner.unwrap_option(),
            Value::Option(None) => None,
            other => Some(other),
        }
    }

    fn child(&self, segment: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields
                .iter()
                .find(|(name, _)| name == segment)
                .map(|(_, v)| v)
                .or_else(|| {
                    let idx: usize = segment.parse().ok()?;
                    fields.get(idx).map(|(_, v)| v)
                }),
            Value::List(items) => items.get(segment.parse::<usize>().ok()?),
            Value::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.key_string() == segment)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn has(&self, path: &str) -> bool {
        self.get_value(path).is_some()
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        match self.get_value(path)? {
            Value::String(s) | Value::Address(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_big(&self, path: &str) -> Option<I256> {
        match self.get_value(path)? {
            Value::Int(v) => Some(*v),
            Value::String(s) => I256::from_dec_str(s).ok(),
            _ => None,
        }
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        match self.get_value(path)? {
            Value::Int(v) => i64::try_from(*v).ok(),
            Value::String(s) => s.parse().ok(),
            Value::Timestamp(t) => Some(t.timestamp()),
            _ => None,
        }
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        match self.get_value(path)? {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get_address(&self, path: &str) -> Option<&str> {
        match self.get_value(path)? {
            Value::Address(s) => Some(s),
            Value::String(s) if looks_like_address(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_time(&self, path: &str) -> Option<DateTime<Utc>> {
        match self.get_value(path)? {
            Value::Timestamp(t) => Some(*t),
            Value::Int(v) => DateTime::from_timestamp(i64::try_from(*v).ok()?, 0),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Visits every leaf below `path` with its full dotted path.
    ///
    /// A missing path visits nothing.
    pub fn walk<F, E>(&self, path: &str, mut visit: F) -> Result<(), E>
    where
        F: FnMut(&str, &Value) -> Result<(), E>,
    {
        match self.get_value(path) {
            Some(start) => start.walk_inner(path, &mut visit),
            None => Ok(()),
        }
    }

    fn walk_inner<F, E>(&self, path: &str, visit: &mut F) -> Result<(), E>
    where
        F: FnMut(&str, &Value) -> Result<(), E>,
    {
        let join = |seg: &str| {
            if path.is_empty() {
                seg.to_string()
            } else {
                format!("{}.{}", path, seg)
            }
        };
        match self {
            Value::Record(fields) => {
                for (name, v) in fields {
                    v.walk_inner(&join(name), visit)?;
                }
                Ok(())
            }
            Value::List(items) => {
                for (i, v) in items.iter().enumerate() {
                    v.walk_inner(&join(&i.to_string()), visit)?;
                }
                Ok(())
            }
            Value::Map(entries) => {
                for (k, v) in entries {
                    v.walk_inner(&join(&k.key_string()), visit)?;
                }
                Ok(())
            }
            Value::Option(Some(inner)) => inner.walk_inner(path, visit),
            leaf => visit(path, leaf),
        }
    }

    /// Rendering used for map keys and path matching.
    pub fn key_string(&self) -> String {
        match self {
            Value::String(s) | Value::Address(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn looks_like_address(s: &str) -> bool {
    s.len() >= 36
        && ["tz1", "tz2", "tz3", "tz4", "KT1", "txr1", "sr1"]
            .iter()
            .any(|p| s.starts_with(p))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("Unit"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::String(s) | Value::Address(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => f.write_str(&hex::encode(b)),
            Value::Timestamp(t) => f.write_str(&t.to_rfc3339()),
            Value::Option(None) => f.write_str("None"),
            Value::Option(Some(v)) => write!(f, "{}", v),
            Value::Code(p) => write!(f, "{}", p),
            Value::Error(e) => write!(f, "<error: {}>", e),
            Value::List(_) | Value::Map(_) | Value::Record(_) => {
                write!(f, "{}", self.to_json())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Unit => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(v) => serializer.serialize_str(&v.to_string()),
            Value::String(s) | Value::Address(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_str(&hex::encode(b)),
            Value::Timestamp(t) => serializer.serialize_str(&t.to_rfc3339()),
            Value::Option(None) => serializer.serialize_none(),
            Value::Option(Some(v)) => v.serialize(serializer),
            Value::Code(p) => p.serialize(serializer),
            Value::Error(e) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("@error", e)?;
                map.end()
            }
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(&k.key_string(), v)?;
                }
                map.end()
            }
            Value::Record(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

/// Server-rendered values arrive as plain JSON; integers are kept exact.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Option(None),
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match I256::from_str(&n.to_string()) {
                Ok(v) => Value::Int(v),
                Err(_) => Value::String(n.to_string()),
            },
            serde_json::Value::String(s) => {
                if looks_like_address(&s) {
                    Value::Address(s)
                } else {
                    Value::String(s)
                }
            }
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Record(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}
