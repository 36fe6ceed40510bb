//! Contract value codec.
//!
//! Contract storage, call parameters and bigmap entries travel as binary
//! primitive trees. [`Prim`] decodes the binary and JSON encodings into an
//! untyped tree; [`decode_typed`] renders that tree against a contract type
//! into a generic [`Value`] with named fields, and [`decode_untyped`] is the
//! fallback when no type is known.

pub mod address;
pub mod error;
pub mod opcode;
pub mod params;
pub mod prim;
pub mod typed;
pub mod value;

pub use address::{decode_address, encode_address};
pub use error::ValueDecodeError;
pub use opcode::OpCode;
pub use params::Parameters;
pub use prim::Prim;
pub use typed::{decode_typed, decode_untyped, OnError};
pub use value::Value;

/// Decodes binary `buf` against `typ`, or into a primitive-only tree when no
/// type is available.
pub fn decode_value(
    typ: Option<&Prim>,
    buf: &[u8],
    on_error: OnError,
) -> Result<Value, ValueDecodeError> {
    let data = Prim::from_binary(buf)?;
    match typ {
        Some(typ) => decode_typed(typ, &data, on_error),
        None => Ok(decode_untyped(&data)),
    }
}
