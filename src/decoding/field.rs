//! Per-field value parsers shared by the positional and object row forms.
//!
//! Every parser works on the raw JSON text of one value so integers never
//! pass through floating point. The indexer sends flags as `0`/`1` in
//! compact rows and as `true`/`false` in objects; both are accepted.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

use super::error::FieldError;

/// A type that can be parsed from one raw JSON field value.
pub trait FromField: Sized {
    fn from_field(raw: &RawValue) -> Result<Self, FieldError>;
}

/// Assigns the parsed value of `raw` to `slot`.
pub fn set<T: FromField>(slot: &mut T, raw: &RawValue) -> Result<(), FieldError> {
    *slot = T::from_field(raw)?;
    Ok(())
}

/// Parses `raw` with serde for nested structures (metadata, embedded lists).
pub fn set_json<T: DeserializeOwned>(slot: &mut T, raw: &RawValue) -> Result<(), FieldError> {
    *slot = serde_json::from_str(raw.get())?;
    Ok(())
}

/// Unquoted text of a scalar value. Strings are unescaped, numbers and
/// literals are returned as written.
pub fn scalar_text(raw: &RawValue) -> Result<std::borrow::Cow<'_, str>, FieldError> {
    let text = raw.get().trim();
    if text.starts_with('"') {
        let s: String = serde_json::from_str(text)?;
        Ok(std::borrow::Cow::Owned(s))
    } else {
        Ok(std::borrow::Cow::Borrowed(text))
    }
}

pub fn is_null(raw: &RawValue) -> bool {
    raw.get().trim() == "null"
}

macro_rules! impl_from_field_int {
    ($($t:ty),*) => {
        $(
            impl FromField for $t {
                fn from_field(raw: &RawValue) -> Result<Self, FieldError> {
                    let text = scalar_text(raw)?;
                    Ok(text.parse::<$t>()?)
                }
            }
        )*
    };
}

impl_from_field_int!(u64, i64, u32, i32, u16, i16, u8);

impl FromField for f64 {
    fn from_field(raw: &RawValue) -> Result<Self, FieldError> {
        let text = scalar_text(raw)?;
        Ok(text.parse::<f64>()?)
    }
}

impl FromField for bool {
    fn from_field(raw: &RawValue) -> Result<Self, FieldError> {
        match scalar_text(raw)?.as_ref() {
            "1" | "true" => Ok(true),
            "0" | "false" | "" => Ok(false),
            _ => Err(FieldError::InvalidBool),
        }
    }
}

impl FromField for String {
    fn from_field(raw: &RawValue) -> Result<Self, FieldError> {
        Ok(scalar_text(raw)?.into_owned())
    }
}

/// Compact rows carry Unix milliseconds, objects carry RFC 3339 strings.
impl FromField for DateTime<Utc> {
    fn from_field(raw: &RawValue) -> Result<Self, FieldError> {
        let text = raw.get().trim();
        if text.starts_with('"') {
            let s: String = serde_json::from_str(text)?;
            if let Ok(ms) = s.parse::<i64>() {
                return millis_to_time(ms);
            }
            return Ok(DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc));
        }
        millis_to_time(text.parse::<i64>()?)
    }
}

fn millis_to_time(ms: i64) -> Result<DateTime<Utc>, FieldError> {
    let nanos = ms
        .checked_mul(1_000_000)
        .ok_or(FieldError::TimestampOutOfRange)?;
    Ok(DateTime::from_timestamp_nanos(nanos))
}

impl<T: FromField> FromField for Option<T> {
    fn from_field(raw: &RawValue) -> Result<Self, FieldError> {
        if is_null(raw) {
            return Ok(None);
        }
        T::from_field(raw).map(Some)
    }
}

/// Lists arrive either as JSON arrays or as comma separated strings.
impl FromField for Vec<String> {
    fn from_field(raw: &RawValue) -> Result<Self, FieldError> {
        let text = raw.get().trim();
        if text.starts_with('[') {
            return Ok(serde_json::from_str(text)?);
        }
        let joined = scalar_text(raw)?;
        if joined.is_empty() {
            return Ok(Vec::new());
        }
        Ok(joined.split(',').map(str::to_string).collect())
    }
}

/// Hex-encoded binary columns.
pub fn hex_bytes(raw: &RawValue) -> Result<Vec<u8>, FieldError> {
    Ok(hex::decode(scalar_text(raw)?.as_ref())?)
}
