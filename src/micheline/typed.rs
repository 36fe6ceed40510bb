use chrono::{DateTime, Utc};

use super::address::encode_address;
use super::error::ValueDecodeError;
use super::opcode::OpCode;
use super::prim::Prim;
use super::value::Value;

/// What to do when one nested value does not match its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnError {
    /// Fail the whole value.
    #[default]
    Abort,
    /// Replace the failing node with [`Value::Error`] and keep going.
    Mark,
}

/// Renders `data` against the type tree `typ`.
pub fn decode_typed(typ: &Prim, data: &Prim, on_error: OnError) -> Result<Value, ValueDecodeError> {
    Renderer { on_error }.render(typ, data, "")
}

/// Renders a value without type information into a primitive-only tree.
pub fn decode_untyped(data: &Prim) -> Value {
    match data {
        Prim::Int(v) => Value::Int(*v),
        Prim::String(s) => Value::String(s.clone()),
        Prim::Bytes(b) => Value::Bytes(b.clone()),
        Prim::Seq(items) => {
            if !items.is_empty() && items.iter().all(|i| i.is_op(OpCode::D_ELT) && i.args().len() == 2) {
                Value::Map(
                    items
                        .iter()
                        .map(|i| (decode_untyped(&i.args()[0]), decode_untyped(&i.args()[1])))
                        .collect(),
                )
            } else {
                Value::List(items.iter().map(decode_untyped).collect())
            }
        }
        Prim::App { op, args, .. } => match *op {
            OpCode::D_TRUE => Value::Bool(true),
            OpCode::D_FALSE => Value::Bool(false),
            OpCode::D_UNIT => Value::Unit,
            OpCode::D_NONE => Value::Option(None),
            OpCode::D_SOME if args.len() == 1 => {
                Value::Option(Some(Box::new(decode_untyped(&args[0]))))
            }
            OpCode::D_LEFT if args.len() == 1 => {
                Value::Record(vec![("left".to_string(), decode_untyped(&args[0]))])
            }
            OpCode::D_RIGHT if args.len() == 1 => {
                Value::Record(vec![("right".to_string(), decode_untyped(&args[0]))])
            }
            OpCode::D_PAIR | OpCode::D_ELT => {
                let mut items = Vec::with_capacity(args.len());
                flatten_untyped_pair(args, &mut items);
                Value::List(items)
            }
            _ => Value::Code(data.clone()),
        },
    }
}

fn flatten_untyped_pair(args: &[Prim], out: &mut Vec<Value>) {
    for (i, arg) in args.iter().enumerate() {
        if i + 1 == args.len() && arg.is_op(OpCode::D_PAIR) {
            flatten_untyped_pair(arg.args(), out);
        } else {
            out.push(decode_untyped(arg));
        }
    }
}

struct Renderer {
    on_error: OnError,
}

impl Renderer {
    fn render(&self, typ: &Prim, data: &Prim, path: &str) -> Result<Value, ValueDecodeError> {
        match self.render_strict(typ, data, path) {
            Ok(v) => Ok(v),
            Err(e) => match self.on_error {
                OnError::Abort => Err(e),
                OnError::Mark => {
                    tracing::debug!("marking undecodable value at '{}': {}", path, e);
                    Ok(Value::Error(e.to_string()))
                }
            },
        }
    }

    fn render_strict(&self, typ: &Prim, data: &Prim, path: &str) -> Result<Value, ValueDecodeError> {
        let Some(op) = typ.op() else {
            return Err(ValueDecodeError::mismatch(path, "type", typ.kind()));
        };
        match (op, data) {
            (OpCode::T_INT | OpCode::T_NAT | OpCode::T_MUTEZ, Prim::Int(v)) => Ok(Value::Int(*v)),
            (OpCode::T_STRING, Prim::String(s)) => Ok(Value::String(s.clone())),
            (OpCode::T_BYTES, Prim::Bytes(b)) => Ok(Value::Bytes(b.clone())),
            (OpCode::T_BOOL, d) if d.is_op(OpCode::D_TRUE) => Ok(Value::Bool(true)),
            (OpCode::T_BOOL, d) if d.is_op(OpCode::D_FALSE) => Ok(Value::Bool(false)),
            (OpCode::T_UNIT, d) if d.is_op(OpCode::D_UNIT) => Ok(Value::Unit),
            (OpCode::T_TIMESTAMP, Prim::Int(v)) => Ok(i64::try_from(*v)
                .ok()
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                .map(Value::Timestamp)
                .unwrap_or(Value::Int(*v))),
            (OpCode::T_TIMESTAMP, Prim::String(s)) => Ok(DateTime::parse_from_rfc3339(s)
                .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
                .unwrap_or_else(|_| Value::String(s.clone()))),
            (OpCode::T_ADDRESS | OpCode::T_CONTRACT | OpCode::T_KEY_HASH, Prim::String(s)) => {
                Ok(Value::Address(s.clone()))
            }
            (OpCode::T_ADDRESS | OpCode::T_CONTRACT | OpCode::T_KEY_HASH, Prim::Bytes(b)) => {
                Ok(encode_address(b)
                    .map(Value::Address)
                    .unwrap_or_else(|| Value::Bytes(b.clone())))
            }
            (OpCode::T_KEY | OpCode::T_SIGNATURE | OpCode::T_CHAIN_ID, Prim::String(s)) => {
                Ok(Value::String(s.clone()))
            }
            (OpCode::T_KEY | OpCode::T_SIGNATURE | OpCode::T_CHAIN_ID, Prim::Bytes(b)) => {
                Ok(Value::Bytes(b.clone()))
            }
            (OpCode::T_OPTION, d) if d.is_op(OpCode::D_NONE) => Ok(Value::Option(None)),
            (OpCode::T_OPTION, d) if d.is_op(OpCode::D_SOME) => {
                let inner = self.render(arg(typ, 0, path)?, arg(d, 0, path)?, path)?;
                Ok(Value::Option(Some(Box::new(inner))))
            }
            (OpCode::T_LIST | OpCode::T_SET, Prim::Seq(items)) => {
                let item_type = arg(typ, 0, path)?;
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.render(item_type, item, &join(path, &i.to_string())))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            (OpCode::T_MAP | OpCode::T_BIG_MAP, Prim::Seq(items)) => {
                let (key_type, value_type) = (arg(typ, 0, path)?, arg(typ, 1, path)?);
                let mut entries = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    if !item.is_op(OpCode::D_ELT) {
                        return Err(ValueDecodeError::mismatch(path, "Elt", item.kind()));
                    }
                    let item_path = join(path, &i.to_string());
                    let key = self.render(key_type, arg(item, 0, path)?, &item_path)?;
                    let value_path = join(path, &key.key_string());
                    let value = self.render(value_type, arg(item, 1, path)?, &value_path)?;
                    entries.push((key, value));
                }
                Ok(Value::Map(entries))
            }
            // a bigmap inside storage is referenced by id
            (OpCode::T_BIG_MAP, Prim::Int(v)) => Ok(Value::Int(*v)),
            (OpCode::T_PAIR, d) if d.is_op(OpCode::D_PAIR) || matches!(d, Prim::Seq(_)) => {
                let mut fields = Vec::new();
                self.render_pair(typ, d, path, &mut fields)?;
                Ok(Value::Record(fields))
            }
            (OpCode::T_OR, d) if d.is_op(OpCode::D_LEFT) || d.is_op(OpCode::D_RIGHT) => {
                let (idx, default_name) = if d.is_op(OpCode::D_LEFT) {
                    (0, "left")
                } else {
                    (1, "right")
                };
                let branch_type = arg(typ, idx, path)?;
                let name = branch_type.label().unwrap_or(default_name).to_string();
                let inner = self.render(branch_type, arg(d, 0, path)?, &join(path, &name))?;
                Ok(Value::Record(vec![(name, inner)]))
            }
            (OpCode::T_LAMBDA, d) => Ok(Value::Code(d.clone())),
            (OpCode::T_TICKET, d) => Ok(decode_untyped(d)),
            (OpCode::T_NEVER | OpCode::T_OPERATION, d) => Ok(Value::Code(d.clone())),
            (_, d) if has_structured_rendering(op) => {
                Err(ValueDecodeError::mismatch(path, op.name(), d.kind()))
            }
            // types without a structured rendering (bls12_381, sapling, chest, ...)
            (_, d) if op.is_type() => Ok(decode_untyped(d)),
            _ => Err(ValueDecodeError::mismatch(path, "type", op.name())),
        }
    }

    /// Flattens a right comb of pairs into one record. Nested pairs without a
    /// field annotation merge into the parent; annotated ones become sub-records.
    fn render_pair(
        &self,
        typ: &Prim,
        data: &Prim,
        path: &str,
        fields: &mut Vec<(String, Value)>,
    ) -> Result<(), ValueDecodeError> {
        let (left_type, right_type) = split_comb(typ)
            .ok_or_else(|| ValueDecodeError::mismatch(path, "pair type", typ.kind()))?;
        let (left_data, right_data) = split_comb(data)
            .ok_or_else(|| ValueDecodeError::mismatch(path, "Pair", data.kind()))?;

        self.push_field(&left_type, &left_data, path, fields)?;
        let merge_right = right_type.is_op(OpCode::T_PAIR)
            && right_type.field_name().is_none()
            && (right_data.is_op(OpCode::D_PAIR) || matches!(right_data, Prim::Seq(_)));
        if merge_right {
            self.render_pair(&right_type, &right_data, path, fields)
        } else {
            self.push_field(&right_type, &right_data, path, fields)
        }
    }

    fn push_field(
        &self,
        typ: &Prim,
        data: &Prim,
        path: &str,
        fields: &mut Vec<(String, Value)>,
    ) -> Result<(), ValueDecodeError> {
        let name = typ
            .field_name()
            .map(str::to_string)
            .unwrap_or_else(|| fields.len().to_string());
        let value = self.render(typ, data, &join(path, &name))?;
        fields.push((name, value));
        Ok(())
    }
}

/// Splits an n-ary pair (type, data constructor or comb sequence) into its
/// first element and the pair of the remainder.
fn split_comb(p: &Prim) -> Option<(Prim, Prim)> {
    let (op, items) = match p {
        Prim::App { op, args, .. } if *op == OpCode::T_PAIR || *op == OpCode::D_PAIR => {
            (*op, args.as_slice())
        }
        Prim::Seq(items) => (OpCode::D_PAIR, items.as_slice()),
        _ => return None,
    };
    match items.len() {
        0 | 1 => None,
        2 => Some((items[0].clone(), items[1].clone())),
        _ => Some((items[0].clone(), Prim::app(op, items[1..].to_vec()))),
    }
}

fn has_structured_rendering(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::T_INT
            | OpCode::T_NAT
            | OpCode::T_MUTEZ
            | OpCode::T_STRING
            | OpCode::T_BYTES
            | OpCode::T_BOOL
            | OpCode::T_UNIT
            | OpCode::T_TIMESTAMP
            | OpCode::T_ADDRESS
            | OpCode::T_CONTRACT
            | OpCode::T_KEY_HASH
            | OpCode::T_KEY
            | OpCode::T_SIGNATURE
            | OpCode::T_CHAIN_ID
            | OpCode::T_OPTION
            | OpCode::T_LIST
            | OpCode::T_SET
            | OpCode::T_MAP
            | OpCode::T_BIG_MAP
            | OpCode::T_PAIR
            | OpCode::T_OR
    )
}

fn arg<'a>(p: &'a Prim, idx: usize, path: &str) -> Result<&'a Prim, ValueDecodeError> {
    p.args()
        .get(idx)
        .ok_or_else(|| ValueDecodeError::mismatch(path, format!("argument {}", idx), p.kind()))
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(op: OpCode) -> Prim {
        Prim::app(op, vec![])
    }

    fn field(op: OpCode, args: Vec<Prim>, name: &str) -> Prim {
        let annot = format!("%{}", name);
        Prim::annotated(op, args, &[annot.as_str()])
    }

    fn d_pair(args: Vec<Prim>) -> Prim {
        Prim::app(OpCode::D_PAIR, args)
    }

    #[test]
    fn test_flat_record_from_right_comb() {
        // pair (address %owner) (pair (nat %total) (string %name))
        let typ = Prim::app(
            OpCode::T_PAIR,
            vec![
                field(OpCode::T_ADDRESS, vec![], "owner"),
                Prim::app(
                    OpCode::T_PAIR,
                    vec![field(OpCode::T_NAT, vec![], "total"), field(OpCode::T_STRING, vec![], "name")],
                ),
            ],
        );
        // data written as a flat three-element Pair
        let data = d_pair(vec![
            Prim::String("tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb".into()),
            Prim::int(42),
            Prim::String("token".into()),
        ]);
        let v = decode_typed(&typ, &data, OnError::Abort).unwrap();
        assert_eq!(v.get_address("owner"), Some("tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb"));
        assert_eq!(v.get_i64("total"), Some(42));
        assert_eq!(v.get_str("name"), Some("token"));
    }

    #[test]
    fn test_positional_names_without_annotations() {
        let typ = Prim::app(OpCode::T_PAIR, vec![t(OpCode::T_INT), t(OpCode::T_BOOL)]);
        let data = d_pair(vec![Prim::int(-3), Prim::app(OpCode::D_TRUE, vec![])]);
        let v = decode_typed(&typ, &data, OnError::Abort).unwrap();
        assert_eq!(v.get_i64("0"), Some(-3));
        assert_eq!(v.get_bool("1"), Some(true));
    }

    #[test]
    fn test_map_option_and_timestamp() {
        let typ = Prim::app(
            OpCode::T_PAIR,
            vec![
                field(OpCode::T_MAP, vec![t(OpCode::T_STRING), t(OpCode::T_NAT)], "balances"),
                field(OpCode::T_OPTION, vec![t(OpCode::T_TIMESTAMP)], "deadline"),
            ],
        );
        let data = d_pair(vec![
            Prim::Seq(vec![
                Prim::app(OpCode::D_ELT, vec![Prim::String("alice".into()), Prim::int(10)]),
                Prim::app(OpCode::D_ELT, vec![Prim::String("bob".into()), Prim::int(20)]),
            ]),
            Prim::app(OpCode::D_SOME, vec![Prim::int(1_600_000_000)]),
        ]);
        let v = decode_typed(&typ, &data, OnError::Abort).unwrap();
        assert_eq!(v.get_i64("balances.bob"), Some(20));
        assert_eq!(v.get_time("deadline").unwrap().timestamp(), 1_600_000_000);
    }

    #[test]
    fn test_or_branch_uses_annotation() {
        let typ = Prim::app(
            OpCode::T_OR,
            vec![field(OpCode::T_NAT, vec![], "deposit"), field(OpCode::T_UNIT, vec![], "withdraw")],
        );
        let data = Prim::app(OpCode::D_RIGHT, vec![Prim::app(OpCode::D_UNIT, vec![])]);
        let v = decode_typed(&typ, &data, OnError::Abort).unwrap();
        assert!(v.has("withdraw"));
        assert!(!v.has("deposit"));
    }

    #[test]
    fn test_bytes_address() {
        let mut buf = vec![0u8, 0u8];
        buf.extend_from_slice(&[3u8; 20]);
        let v = decode_typed(&t(OpCode::T_ADDRESS), &Prim::Bytes(buf), OnError::Abort).unwrap();
        assert!(matches!(v, Value::Address(ref a) if a.starts_with("tz1")));
    }

    #[test]
    fn test_mismatch_aborts_with_path() {
        let typ = Prim::app(
            OpCode::T_PAIR,
            vec![field(OpCode::T_NAT, vec![], "a"), field(OpCode::T_STRING, vec![], "b")],
        );
        let data = d_pair(vec![Prim::int(1), Prim::int(2)]);
        let err = decode_typed(&typ, &data, OnError::Abort).unwrap_err();
        match err {
            ValueDecodeError::TypeMismatch { path, expected, found } => {
                assert_eq!(path, "b");
                assert_eq!(expected, "string");
                assert_eq!(found, "int");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_mismatch_marked_in_place() {
        let typ = Prim::app(
            OpCode::T_PAIR,
            vec![field(OpCode::T_NAT, vec![], "a"), field(OpCode::T_STRING, vec![], "b")],
        );
        let data = d_pair(vec![Prim::int(1), Prim::int(2)]);
        let v = decode_typed(&typ, &data, OnError::Mark).unwrap();
        assert_eq!(v.get_i64("a"), Some(1));
        assert!(v.get_value("b").unwrap().is_error());
    }

    #[test]
    fn test_untyped_fallback() {
        let data = d_pair(vec![
            Prim::int(1),
            d_pair(vec![Prim::String("x".into()), Prim::Bytes(vec![1])]),
        ]);
        let v = decode_untyped(&data);
        assert_eq!(v.get_i64("0"), Some(1));
        assert_eq!(v.get_str("1"), Some("x"));
        assert_eq!(v.get_value("2"), Some(&Value::Bytes(vec![1])));
    }
}
