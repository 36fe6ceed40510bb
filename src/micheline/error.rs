//! Contract value decoding errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValueDecodeError {
    #[error("unexpected end of data at offset {offset}, need {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("unknown primitive tag {tag} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("unknown opcode {0}")]
    UnknownOpCode(u8),

    #[error("unknown opcode name '{0}'")]
    UnknownOpName(String),

    #[error("integer does not fit 256 bits")]
    Overflow,

    #[error("invalid UTF-8 in string primitive: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid primitive JSON: {0}")]
    InvalidJson(String),

    #[error("primitive nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("{trailing} trailing bytes after primitive")]
    TrailingBytes { trailing: usize },

    #[error("type mismatch at '{path}': expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("unknown entrypoint tag {0}")]
    UnknownEntrypointTag(u8),

    #[error("entrypoint '{0}' not found in parameter type")]
    EntrypointNotFound(String),
}

impl ValueDecodeError {
    pub(crate) fn mismatch(path: &str, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            path: if path.is_empty() { "$".to_string() } else { path.to_string() },
            expected: expected.into(),
            found: found.into(),
        }
    }
}
