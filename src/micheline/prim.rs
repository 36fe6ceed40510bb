use std::fmt;

use alloy_primitives::{I256, U256};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use super::error::ValueDecodeError;
use super::opcode::OpCode;

const MAX_DEPTH: usize = 1024;

const TAG_INT: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_SEQ: u8 = 2;
const TAG_PRIM0: u8 = 3;
const TAG_PRIM0_ANNOTS: u8 = 4;
const TAG_PRIM1: u8 = 5;
const TAG_PRIM1_ANNOTS: u8 = 6;
const TAG_PRIM2: u8 = 7;
const TAG_PRIM2_ANNOTS: u8 = 8;
const TAG_PRIMN: u8 = 9;
const TAG_BYTES: u8 = 10;

/// Untyped primitive tree, the common form of contract types and values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prim {
    Int(I256),
    String(String),
    Bytes(Vec<u8>),
    Seq(Vec<Prim>),
    App {
        op: OpCode,
        args: Vec<Prim>,
        annots: Vec<String>,
    },
}

impl Prim {
    pub fn app(op: OpCode, args: Vec<Prim>) -> Self {
        Prim::App {
            op,
            args,
            annots: Vec::new(),
        }
    }

    pub fn annotated(op: OpCode, args: Vec<Prim>, annots: &[&str]) -> Self {
        Prim::App {
            op,
            args,
            annots: annots.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn int(v: i64) -> Self {
        Prim::Int(I256::try_from(v).unwrap_or_default())
    }

    pub fn op(&self) -> Option<OpCode> {
        match self {
            Prim::App { op, .. } => Some(*op),
            _ => None,
        }
    }

    pub fn is_op(&self, code: OpCode) -> bool {
        self.op() == Some(code)
    }

    pub fn args(&self) -> &[Prim] {
        match self {
            Prim::App { args, .. } => args,
            Prim::Seq(items) => items,
            _ => &[],
        }
    }

    pub fn annots(&self) -> &[String] {
        match self {
            Prim::App { annots, .. } => annots,
            _ => &[],
        }
    }

    /// First `%field` annotation without its sigil.
    pub fn field_name(&self) -> Option<&str> {
        self.annots()
            .iter()
            .find_map(|a| a.strip_prefix('%'))
            .filter(|a| !a.is_empty())
    }

    /// First `:type` annotation without its sigil.
    pub fn type_name(&self) -> Option<&str> {
        self.annots()
            .iter()
            .find_map(|a| a.strip_prefix(':'))
            .filter(|a| !a.is_empty())
    }

    /// Field name, falling back to the type annotation.
    pub fn label(&self) -> Option<&str> {
        self.field_name().or_else(|| self.type_name())
    }

    /// Short description used in mismatch errors.
    pub fn kind(&self) -> String {
        match self {
            Prim::Int(_) => "int".to_string(),
            Prim::String(_) => "string".to_string(),
            Prim::Bytes(_) => "bytes".to_string(),
            Prim::Seq(_) => "sequence".to_string(),
            Prim::App { op, .. } => op.name().to_string(),
        }
    }

    /// Decodes one primitive from its binary encoding; the whole buffer must be consumed.
    pub fn from_binary(buf: &[u8]) -> Result<Self, ValueDecodeError> {
        let mut reader = Reader::new(buf);
        let prim = reader.read_prim(0)?;
        if reader.remaining() > 0 {
            return Err(ValueDecodeError::TrailingBytes {
                trailing: reader.remaining(),
            });
        }
        Ok(prim)
    }

    pub fn from_hex(text: &str) -> Result<Self, ValueDecodeError> {
        let buf = hex::decode(text)?;
        Self::from_binary(&buf)
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_binary(&mut out);
        out
    }

    fn write_binary(&self, out: &mut Vec<u8>) {
        match self {
            Prim::Int(v) => {
                out.push(TAG_INT);
                write_zarith(*v, out);
            }
            Prim::String(s) => {
                out.push(TAG_STRING);
                write_len_prefixed(s.as_bytes(), out);
            }
            Prim::Bytes(b) => {
                out.push(TAG_BYTES);
                write_len_prefixed(b, out);
            }
            Prim::Seq(items) => {
                out.push(TAG_SEQ);
                let mut inner = Vec::new();
                for item in items {
                    item.write_binary(&mut inner);
                }
                write_len_prefixed(&inner, out);
            }
            Prim::App { op, args, annots } => {
                let has_annots = !annots.is_empty();
                let tag = match (args.len(), has_annots) {
                    (0, false) => TAG_PRIM0,
                    (0, true) => TAG_PRIM0_ANNOTS,
                    (1, false) => TAG_PRIM1,
                    (1, true) => TAG_PRIM1_ANNOTS,
                    (2, false) => TAG_PRIM2,
                    (2, true) => TAG_PRIM2_ANNOTS,
                    _ => TAG_PRIMN,
                };
                out.push(tag);
                out.push(op.as_u8());
                if tag == TAG_PRIMN {
                    let mut inner = Vec::new();
                    for arg in args {
                        arg.write_binary(&mut inner);
                    }
                    write_len_prefixed(&inner, out);
                    write_len_prefixed(annots.join(" ").as_bytes(), out);
                } else {
                    for arg in args {
                        arg.write_binary(out);
                    }
                    if has_annots {
                        write_len_prefixed(annots.join(" ").as_bytes(), out);
                    }
                }
            }
        }
    }

    /// Builds a primitive from the node's JSON form (`{"prim":..}`, `{"int":..}`, arrays, ...).
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ValueDecodeError> {
        Self::from_json_depth(value, 0)
    }

    fn from_json_depth(value: &serde_json::Value, depth: usize) -> Result<Self, ValueDecodeError> {
        if depth > MAX_DEPTH {
            return Err(ValueDecodeError::TooDeep(MAX_DEPTH));
        }
        match value {
            serde_json::Value::Array(items) => items
                .iter()
                .map(|v| Self::from_json_depth(v, depth + 1))
                .collect::<Result<Vec<_>, _>>()
                .map(Prim::Seq),
            serde_json::Value::Object(map) => {
                if let Some(v) = map.get("int") {
                    let text = v
                        .as_str()
                        .ok_or_else(|| ValueDecodeError::InvalidJson("int must be a string".into()))?;
                    let n = I256::from_dec_str(text)
                        .map_err(|e| ValueDecodeError::InvalidJson(format!("int '{}': {}", text, e)))?;
                    return Ok(Prim::Int(n));
                }
                if let Some(v) = map.get("string") {
                    let text = v
                        .as_str()
                        .ok_or_else(|| ValueDecodeError::InvalidJson("string must be a string".into()))?;
                    return Ok(Prim::String(text.to_string()));
                }
                if let Some(v) = map.get("bytes") {
                    let text = v
                        .as_str()
                        .ok_or_else(|| ValueDecodeError::InvalidJson("bytes must be a string".into()))?;
                    return Ok(Prim::Bytes(hex::decode(text)?));
                }
                let name = map
                    .get("prim")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ValueDecodeError::InvalidJson("missing prim".into()))?;
                let op = OpCode::from_name(name)?;
                let args = match map.get("args") {
                    Some(serde_json::Value::Array(items)) => items
                        .iter()
                        .map(|v| Self::from_json_depth(v, depth + 1))
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(_) => return Err(ValueDecodeError::InvalidJson("args must be an array".into())),
                    None => Vec::new(),
                };
                let annots = match map.get("annots") {
                    Some(serde_json::Value::Array(items)) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    _ => Vec::new(),
                };
                Ok(Prim::App { op, args, annots })
            }
            other => Err(ValueDecodeError::InvalidJson(format!(
                "unexpected node {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Prim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prim::Int(v) => write!(f, "{}", v),
            Prim::String(s) => write!(f, "{:?}", s),
            Prim::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Prim::Seq(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("}")
            }
            Prim::App { op, args, annots } => {
                let wrap = !args.is_empty() || !annots.is_empty();
                if wrap {
                    f.write_str("(")?;
                }
                f.write_str(op.name())?;
                for annot in annots {
                    write!(f, " {}", annot)?;
                }
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                if wrap {
                    f.write_str(")")?;
                }
                Ok(())
            }
        }
    }
}

impl<'de> Deserialize<'de> for Prim {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Prim::from_json(&value).map_err(de::Error::custom)
    }
}

impl Serialize for Prim {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Prim::Int(v) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("int", &v.to_string())?;
                map.end()
            }
            Prim::String(s) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("string", s)?;
                map.end()
            }
            Prim::Bytes(b) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("bytes", &hex::encode(b))?;
                map.end()
            }
            Prim::Seq(items) => items.serialize(serializer),
            Prim::App { op, args, annots } => {
                let len = 1 + usize::from(!args.is_empty()) + usize::from(!annots.is_empty());
                let mut map = serializer.serialize_map(Some(len))?;
                map.serialize_entry("prim", op.name())?;
                if !args.is_empty() {
                    map.serialize_entry("args", args)?;
                }
                if !annots.is_empty() {
                    map.serialize_entry("annots", annots)?;
                }
                map.end()
            }
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ValueDecodeError> {
        if self.remaining() < n {
            return Err(ValueDecodeError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, ValueDecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<usize, ValueDecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
    }

    fn read_len_prefixed(&mut self) -> Result<&'a [u8], ValueDecodeError> {
        let len = self.read_u32()?;
        self.take(len)
    }

    fn read_annots(&mut self) -> Result<Vec<String>, ValueDecodeError> {
        let raw = self.read_len_prefixed()?;
        let text = String::from_utf8(raw.to_vec())?;
        Ok(text.split(' ').filter(|a| !a.is_empty()).map(str::to_string).collect())
    }

    fn read_zarith(&mut self) -> Result<I256, ValueDecodeError> {
        let first = self.read_u8()?;
        let negative = first & 0x40 != 0;
        let mut magnitude = U256::from(first & 0x3f);
        let mut more = first & 0x80 != 0;
        let mut shift = 6usize;
        while more {
            let byte = self.read_u8()?;
            let chunk = U256::from(byte & 0x7f);
            if !chunk.is_zero() {
                if shift >= 256 || (chunk << shift) >> shift != chunk {
                    return Err(ValueDecodeError::Overflow);
                }
                magnitude |= chunk << shift;
            }
            shift += 7;
            more = byte & 0x80 != 0;
        }
        let value = I256::try_from(magnitude).map_err(|_| ValueDecodeError::Overflow)?;
        Ok(if negative { -value } else { value })
    }

    fn read_prim(&mut self, depth: usize) -> Result<Prim, ValueDecodeError> {
        if depth > MAX_DEPTH {
            return Err(ValueDecodeError::TooDeep(MAX_DEPTH));
        }
        let offset = self.pos;
        let tag = self.read_u8()?;
        match tag {
            TAG_INT => Ok(Prim::Int(self.read_zarith()?)),
            TAG_STRING => {
                let raw = self.read_len_prefixed()?;
                Ok(Prim::String(String::from_utf8(raw.to_vec())?))
            }
            TAG_BYTES => Ok(Prim::Bytes(self.read_len_prefixed()?.to_vec())),
            TAG_SEQ => {
                let mut inner = Reader::new(self.read_len_prefixed()?);
                let mut items = Vec::new();
                while inner.remaining() > 0 {
                    items.push(inner.read_prim(depth + 1)?);
                }
                Ok(Prim::Seq(items))
            }
            TAG_PRIM0..=TAG_PRIM2_ANNOTS => {
                let op = OpCode::from_u8(self.read_u8()?)?;
                let nargs = ((tag - TAG_PRIM0) / 2) as usize;
                let mut args = Vec::with_capacity(nargs);
                for _ in 0..nargs {
                    args.push(self.read_prim(depth + 1)?);
                }
                let annots = if (tag - TAG_PRIM0) % 2 == 1 {
                    self.read_annots()?
                } else {
                    Vec::new()
                };
                Ok(Prim::App { op, args, annots })
            }
            TAG_PRIMN => {
                let op = OpCode::from_u8(self.read_u8()?)?;
                let mut inner = Reader::new(self.read_len_prefixed()?);
                let mut args = Vec::new();
                while inner.remaining() > 0 {
                    args.push(inner.read_prim(depth + 1)?);
                }
                let annots = self.read_annots()?;
                Ok(Prim::App { op, args, annots })
            }
            _ => Err(ValueDecodeError::UnknownTag { tag, offset }),
        }
    }
}

fn write_len_prefixed(data: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

fn write_zarith(value: I256, out: &mut Vec<u8>) {
    let negative = value.is_negative();
    let mut magnitude = value.unsigned_abs();
    let mut byte = (magnitude.as_limbs()[0] & 0x3f) as u8;
    if negative {
        byte |= 0x40;
    }
    magnitude >>= 6;
    if magnitude.is_zero() {
        out.push(byte);
        return;
    }
    out.push(byte | 0x80);
    loop {
        let chunk = (magnitude.as_limbs()[0] & 0x7f) as u8;
        magnitude >>= 7;
        if magnitude.is_zero() {
            out.push(chunk);
            return;
        }
        out.push(chunk | 0x80);
    }
}
