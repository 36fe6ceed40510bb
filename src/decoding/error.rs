//! Row decoding error types.

use thiserror::Error;

use crate::micheline::ValueDecodeError;

/// Failure to parse a single field value.
#[derive(Debug, Error)]
pub enum FieldError {
    #[error("invalid integer: {0}")]
    InvalidInteger(#[from] std::num::ParseIntError),

    #[error("invalid float: {0}")]
    InvalidFloat(#[from] std::num::ParseFloatError),

    #[error("invalid boolean")]
    InvalidBool,

    #[error("unknown {kind} '{value}'")]
    UnknownValue { kind: &'static str, value: String },

    #[error("timestamp out of range")]
    TimestampOutOfRange,

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid JSON value: {0}")]
    Json(#[from] serde_json::Error),

    #[error("contract value: {0}")]
    Value(#[from] ValueDecodeError),

    #[error("nested record: {0}")]
    Nested(#[source] Box<DecodeError>),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("expected JSON {expected}, found '{found}'")]
    UnexpectedForm { expected: &'static str, found: char },

    #[error("row has {values} values for {columns} columns")]
    Truncated { columns: usize, values: usize },

    #[error("column '{column}' value {value}: {source}")]
    Column {
        column: String,
        value: String,
        #[source]
        source: FieldError,
    },
}

impl DecodeError {
    /// Wraps a field error with the column name and raw value text.
    pub fn column(column: &str, value: &str, source: FieldError) -> Self {
        const MAX_VALUE_LEN: usize = 256;
        let value = if value.len() > MAX_VALUE_LEN {
            let mut end = MAX_VALUE_LEN;
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &value[..end])
        } else {
            value.to_string()
        };
        Self::Column {
            column: column.to_string(),
            value,
            source,
        }
    }

    /// Name of the failing column, if the error is tied to one.
    pub fn column_name(&self) -> Option<&str> {
        match self {
            DecodeError::Column { column, .. } => Some(column),
            _ => None,
        }
    }
}
