use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::micheline::{
    decode_typed, decode_untyped, OnError, OpCode, Parameters, Prim, Value, ValueDecodeError,
};

/// Script body as served by the explorer with `prim=1`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Script {
    /// Sequence of `parameter`, `storage` and `code` sections.
    #[serde(default)]
    pub code: Option<Prim>,
    /// Current storage value.
    #[serde(default)]
    pub storage: Option<Prim>,
}

impl Script {
    /// Decodes the binary form: length-prefixed code followed by
    /// length-prefixed storage, each a big-endian `u32` length.
    pub fn from_binary(buf: &[u8]) -> Result<Self, ValueDecodeError> {
        let (code, rest) = split_prefixed(buf, 0)?;
        let (storage, _) = split_prefixed(rest, buf.len() - rest.len())?;
        Ok(Self {
            code: Some(Prim::from_binary(code)?),
            storage: Some(Prim::from_binary(storage)?),
        })
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for part in [&self.code, &self.storage] {
            let bytes = part.as_ref().map(Prim::to_binary).unwrap_or_default();
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&bytes);
        }
        out
    }

    fn section(&self, op: OpCode) -> Option<&Prim> {
        self.code
            .as_ref()?
            .args()
            .iter()
            .find(|p| p.is_op(op))
            .and_then(|p| p.args().first())
    }

    pub fn param_type(&self) -> Option<&Prim> {
        self.section(OpCode::PARAMETER)
    }

    pub fn storage_type(&self) -> Option<&Prim> {
        self.section(OpCode::STORAGE)
    }
}

fn split_prefixed(buf: &[u8], offset: usize) -> Result<(&[u8], &[u8]), ValueDecodeError> {
    let Some((len, rest)) = buf.split_first_chunk::<4>() else {
        return Err(ValueDecodeError::Truncated {
            offset,
            needed: 4 - buf.len(),
        });
    };
    let len = u32::from_be_bytes(*len) as usize;
    if rest.len() < len {
        return Err(ValueDecodeError::Truncated {
            offset: offset + 4 + rest.len(),
            needed: len - rest.len(),
        });
    }
    Ok(rest.split_at(len))
}

/// Response of `/explorer/contract/{address}/script`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractScript {
    #[serde(default)]
    pub script: Option<Script>,
    /// Bigmap ids of the contract's current storage, keyed by name.
    #[serde(default)]
    pub bigmaps: BTreeMap<String, i64>,
}

/// One callable entrypoint of a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entrypoint {
    /// Position in a depth-first walk of the parameter type.
    pub id: usize,
    pub name: String,
    /// `L`/`R` path from the parameter root to this branch.
    pub branch: String,
    pub typ: Prim,
}

/// Type information of one contract, used to decode its parameters,
/// storage and bigmap contents.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    param_type: Prim,
    storage_type: Prim,
    entrypoints: Vec<Entrypoint>,
    by_name: HashMap<String, usize>,
    bigmap_types: BTreeMap<String, Prim>,
    bigmap_ids: BTreeMap<String, i64>,
    bigmap_types_by_id: HashMap<i64, Prim>,
}

impl TypeDescriptor {
    /// Builds a descriptor from parameter and storage types plus the
    /// name→id map of the contract's live bigmaps.
    pub fn new(param_type: Prim, storage_type: Prim, bigmap_ids: BTreeMap<String, i64>) -> Self {
        let mut entrypoints = Vec::new();
        collect_entrypoints(&param_type, String::new(), true, &mut entrypoints);
        let by_name = entrypoints
            .iter()
            .map(|e| (e.name.clone(), e.id))
            .collect();

        let mut bigmap_types = BTreeMap::new();
        collect_bigmaps(&storage_type, &mut bigmap_types);
        let bigmap_types_by_id = bigmap_types
            .iter()
            .filter_map(|(name, typ)| bigmap_ids.get(name).map(|id| (*id, typ.clone())))
            .collect();

        Self {
            param_type,
            storage_type,
            entrypoints,
            by_name,
            bigmap_types,
            bigmap_ids,
            bigmap_types_by_id,
        }
    }

    /// Derives a descriptor from a fetched script. Code is not retained.
    pub fn from_script(script: ContractScript) -> Result<Self, ValueDecodeError> {
        let body = script.script.unwrap_or_default();
        let param = body
            .param_type()
            .cloned()
            .ok_or_else(|| ValueDecodeError::mismatch("", "parameter section", "none"))?;
        let storage = body
            .storage_type()
            .cloned()
            .ok_or_else(|| ValueDecodeError::mismatch("", "storage section", "none"))?;
        Ok(Self::new(param, storage, script.bigmaps))
    }

    pub fn param_type(&self) -> &Prim {
        &self.param_type
    }

    pub fn storage_type(&self) -> &Prim {
        &self.storage_type
    }

    pub fn entrypoints(&self) -> &[Entrypoint] {
        &self.entrypoints
    }

    pub fn entrypoint(&self, name: &str) -> Option<&Entrypoint> {
        self.by_name.get(name).map(|id| &self.entrypoints[*id])
    }

    pub fn entrypoint_by_id(&self, id: usize) -> Option<&Entrypoint> {
        self.entrypoints.get(id)
    }

    /// Bigmap types found in the storage type, keyed by name.
    pub fn bigmap_types(&self) -> &BTreeMap<String, Prim> {
        &self.bigmap_types
    }

    pub fn bigmap_ids(&self) -> &BTreeMap<String, i64> {
        &self.bigmap_ids
    }

    pub fn bigmap_type(&self, id: i64) -> Option<&Prim> {
        self.bigmap_types_by_id.get(&id)
    }

    /// Resolves the entrypoint actually invoked by `params` and the value
    /// passed to it.
    ///
    /// Calls through `default` on a contract without an explicit default
    /// entrypoint carry `Left`/`Right` wrappers which are followed down the
    /// parameter type.
    pub fn map_entrypoint(&self, params: &Parameters) -> Result<(&Entrypoint, Prim), ValueDecodeError> {
        if let Some(ep) = self.entrypoint(&params.entrypoint) {
            return Ok((ep, params.value.clone()));
        }
        if params.entrypoint != "default" && params.entrypoint != "root" {
            return Err(ValueDecodeError::EntrypointNotFound(params.entrypoint.clone()));
        }
        let mut typ = &self.param_type;
        let mut value = &params.value;
        let mut branch = String::new();
        while typ.is_op(OpCode::T_OR) {
            let (side, idx) = match value.op() {
                Some(OpCode::D_LEFT) => ('L', 0),
                Some(OpCode::D_RIGHT) => ('R', 1),
                _ => break,
            };
            let (Some(next_type), Some(next_value)) = (typ.args().get(idx), value.args().first()) else {
                break;
            };
            branch.push(side);
            typ = next_type;
            value = next_value;
        }
        self.entrypoints
            .iter()
            .find(|e| e.branch == branch)
            .map(|e| (e, value.clone()))
            .ok_or_else(|| ValueDecodeError::EntrypointNotFound(params.entrypoint.clone()))
    }

    /// Decodes transaction parameters against the called entrypoint.
    pub fn decode_params(&self, params: &Parameters, on_error: OnError) -> Result<(String, Value), ValueDecodeError> {
        let (ep, value) = self.map_entrypoint(params)?;
        Ok((ep.name.clone(), decode_typed(&ep.typ, &value, on_error)?))
    }

    pub fn decode_storage(&self, data: &Prim, on_error: OnError) -> Result<Value, ValueDecodeError> {
        decode_typed(&self.storage_type, data, on_error)
    }

    /// Decodes a binary bigmap key. Unknown bigmap ids decode untyped.
    pub fn decode_bigmap_key(&self, id: i64, buf: &[u8], on_error: OnError) -> Result<Value, ValueDecodeError> {
        self.decode_bigmap_part(id, 0, buf, on_error)
    }

    /// Decodes a binary bigmap value. Unknown bigmap ids decode untyped.
    pub fn decode_bigmap_value(&self, id: i64, buf: &[u8], on_error: OnError) -> Result<Value, ValueDecodeError> {
        self.decode_bigmap_part(id, 1, buf, on_error)
    }

    fn decode_bigmap_part(
        &self,
        id: i64,
        part: usize,
        buf: &[u8],
        on_error: OnError,
    ) -> Result<Value, ValueDecodeError> {
        let data = Prim::from_binary(buf)?;
        match self.bigmap_type(id).and_then(|t| t.args().get(part)) {
            Some(typ) => decode_typed(typ, &data, on_error),
            None => Ok(decode_untyped(&data)),
        }
    }
}

fn collect_entrypoints(typ: &Prim, branch: String, is_root: bool, out: &mut Vec<Entrypoint>) {
    if typ.is_op(OpCode::T_OR) && typ.args().len() == 2 && (is_root || typ.field_name().is_none()) {
        collect_entrypoints(&typ.args()[0], format!("{}L", branch), false, out);
        collect_entrypoints(&typ.args()[1], format!("{}R", branch), false, out);
        return;
    }
    let id = out.len();
    let name = match typ.field_name() {
        Some(name) => name.to_string(),
        None if is_root => "default".to_string(),
        None => format!("@entrypoint_{}", id),
    };
    out.push(Entrypoint {
        id,
        name,
        branch,
        typ: typ.clone(),
    });
}

/// Named bigmaps in a storage type, in depth-first order. Unannotated
/// bigmaps are named `bigmap_<n>`.
fn collect_bigmaps(typ: &Prim, out: &mut BTreeMap<String, Prim>) {
    fn walk(typ: &Prim, out: &mut BTreeMap<String, Prim>, unnamed: &mut usize) {
        if typ.is_op(OpCode::T_BIG_MAP) {
            let name = match typ.label() {
                Some(name) => name.to_string(),
                None => {
                    let name = format!("bigmap_{}", *unnamed);
                    *unnamed += 1;
                    name
                }
            };
            out.insert(name, typ.clone());
            return;
        }
        // lambdas carry their own types that are not part of storage
        if typ.is_op(OpCode::T_LAMBDA) {
            return;
        }
        for arg in typ.args() {
            walk(arg, out, unnamed);
        }
    }
    walk(typ, out, &mut 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(op: OpCode) -> Prim {
        Prim::app(op, vec![])
    }

    fn named(op: OpCode, args: Vec<Prim>, name: &str) -> Prim {
        Prim::annotated(op, args, &[name])
    }

    fn sample() -> TypeDescriptor {
        // or (or (nat %mint) (address %burn)) (unit %pause)
        let param = Prim::app(
            OpCode::T_OR,
            vec![
                Prim::app(
                    OpCode::T_OR,
                    vec![
                        named(OpCode::T_NAT, vec![], "%mint"),
                        named(OpCode::T_ADDRESS, vec![], "%burn"),
                    ],
                ),
                named(OpCode::T_UNIT, vec![], "%pause"),
            ],
        );
        // pair (big_map %ledger address nat) (big_map string bytes)
        let storage = Prim::app(
            OpCode::T_PAIR,
            vec![
                named(OpCode::T_BIG_MAP, vec![t(OpCode::T_ADDRESS), t(OpCode::T_NAT)], "%ledger"),
                Prim::app(OpCode::T_BIG_MAP, vec![t(OpCode::T_STRING), t(OpCode::T_BYTES)]),
            ],
        );
        let ids = BTreeMap::from([("ledger".to_string(), 17), ("bigmap_0".to_string(), 18)]);
        TypeDescriptor::new(param, storage, ids)
    }

    #[test]
    fn test_entrypoints_in_order() {
        let d = sample();
        let names: Vec<_> = d.entrypoints().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["mint", "burn", "pause"]);
        assert_eq!(d.entrypoint("burn").unwrap().branch, "LR");
        assert_eq!(d.entrypoint_by_id(2).unwrap().name, "pause");
    }

    #[test]
    fn test_single_entrypoint_is_default() {
        let d = TypeDescriptor::new(t(OpCode::T_NAT), t(OpCode::T_UNIT), BTreeMap::new());
        assert_eq!(d.entrypoints().len(), 1);
        assert_eq!(d.entrypoints()[0].name, "default");
    }

    #[test]
    fn test_map_entrypoint_through_wrappers() {
        let d = sample();
        let params = Parameters {
            entrypoint: "default".into(),
            value: Prim::app(
                OpCode::D_LEFT,
                vec![Prim::app(OpCode::D_LEFT, vec![Prim::int(5)])],
            ),
        };
        let (ep, value) = d.map_entrypoint(&params).unwrap();
        assert_eq!(ep.name, "mint");
        assert_eq!(value, Prim::int(5));

        let (name, value) = d.decode_params(&params, OnError::Abort).unwrap();
        assert_eq!(name, "mint");
        assert_eq!(value.get_i64(""), Some(5));
    }

    #[test]
    fn test_map_entrypoint_by_name() {
        let d = sample();
        let params = Parameters {
            entrypoint: "pause".into(),
            value: t(OpCode::D_UNIT),
        };
        assert_eq!(d.map_entrypoint(&params).unwrap().0.id, 2);

        let unknown = Parameters {
            entrypoint: "transfer".into(),
            value: t(OpCode::D_UNIT),
        };
        assert!(matches!(
            d.map_entrypoint(&unknown),
            Err(ValueDecodeError::EntrypointNotFound(_))
        ));
    }

    #[test]
    fn test_bigmap_types_by_id() {
        let d = sample();
        assert_eq!(d.bigmap_types().len(), 2);
        assert!(d.bigmap_type(17).unwrap().is_op(OpCode::T_BIG_MAP));
        assert!(d.bigmap_type(99).is_none());

        // value 42 as nat
        let value = d.decode_bigmap_value(17, &Prim::int(42).to_binary(), OnError::Abort).unwrap();
        assert_eq!(value.get_i64(""), Some(42));
        // unknown id falls back to an untyped tree
        let value = d.decode_bigmap_value(99, &Prim::int(42).to_binary(), OnError::Abort).unwrap();
        assert_eq!(value.get_i64(""), Some(42));
    }

    #[test]
    fn test_from_script_json() {
        let script: ContractScript = serde_json::from_str(
            r#"{
                "script": {"code": [
                    {"prim": "parameter", "args": [{"prim": "nat", "annots": ["%deposit"]}]},
                    {"prim": "storage", "args": [{"prim": "big_map", "args": [{"prim": "address"}, {"prim": "nat"}], "annots": ["%balances"]}]},
                    {"prim": "code", "args": [[]]}
                ]},
                "bigmaps": {"balances": 31}
            }"#,
        )
        .unwrap();
        let d = TypeDescriptor::from_script(script).unwrap();
        assert_eq!(d.entrypoints()[0].name, "deposit");
        assert!(d.bigmap_type(31).is_some());
    }

    #[test]
    fn test_from_script_missing_sections() {
        assert!(TypeDescriptor::from_script(ContractScript::default()).is_err());
    }

    #[test]
    fn test_binary_script() {
        let script = Script {
            code: Some(Prim::Seq(vec![
                Prim::app(OpCode::PARAMETER, vec![t(OpCode::T_NAT)]),
                Prim::app(OpCode::STORAGE, vec![t(OpCode::T_STRING)]),
            ])),
            storage: Some(Prim::String("hello".into())),
        };
        let buf = script.to_binary();
        let decoded = Script::from_binary(&buf).unwrap();
        assert_eq!(decoded.param_type(), Some(&t(OpCode::T_NAT)));
        assert_eq!(decoded.storage, Some(Prim::String("hello".into())));

        assert!(matches!(
            Script::from_binary(&buf[..buf.len() - 1]),
            Err(ValueDecodeError::Truncated { .. })
        ));
    }
}
