//! Typed records of the indexer's tables and explorer endpoints.
//!
//! Every record decodes through its static column table, so the same type
//! is filled from table rows, explorer objects and feed messages.

pub mod account;
pub mod bigmap;
pub mod block;
pub mod contract;
pub mod op;
pub mod status;

use serde::{Deserialize, Serialize};

pub use account::Account;
pub use bigmap::{Bigmap, BigmapRow, BigmapUpdate, BigmapUpdateRow, BigmapValue, BigmapValueRow, DiffAction};
pub use block::Block;
pub use contract::Contract;
pub use op::Op;
pub use status::{Chain, Status, Tip};

use crate::client::{Call, Client, ClientError};
use crate::contract::TypeDescriptor;
use crate::decoding::{self, TableRecord};
use crate::micheline::{decode_typed, decode_untyped, OnError, Parameters, Prim, Value, ValueDecodeError};

/// A decoded contract value together with its primitive tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prim: Option<Prim>,
}

impl ContractValue {
    /// Nested value at a dotted path of the decoded tree.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.value.as_ref()?.get_value(path)
    }

    fn untyped(prim: Prim) -> Self {
        Self {
            value: Some(decode_untyped(&prim)),
            prim: Some(prim),
        }
    }
}

/// Call parameters of a contract transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractParameters {
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default, rename = "id", skip_serializing_if = "Option::is_none")]
    pub entrypoint_id: Option<usize>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    #[serde(flatten)]
    pub value: ContractValue,
}

impl ContractParameters {
    /// Decodes binary call parameters, typed when a descriptor is known.
    ///
    /// An entrypoint missing from the descriptor aborts under
    /// [`OnError::Abort`]; under [`OnError::Mark`] the value is kept
    /// untyped and marked with the error.
    pub fn decode(
        buf: &[u8],
        descriptor: Option<&TypeDescriptor>,
        on_error: OnError,
    ) -> Result<Self, ValueDecodeError> {
        let params = Parameters::from_binary(buf)?;
        let Some(descriptor) = descriptor else {
            return Ok(Self {
                entrypoint: params.entrypoint,
                value: ContractValue::untyped(params.value),
                ..Default::default()
            });
        };
        match descriptor.map_entrypoint(&params) {
            Ok((ep, prim)) => Ok(Self {
                entrypoint: ep.name.clone(),
                entrypoint_id: Some(ep.id),
                branch: ep.branch.clone(),
                value: ContractValue {
                    value: Some(decode_typed(&ep.typ, &prim, on_error)?),
                    prim: Some(prim),
                },
            }),
            Err(e) if on_error == OnError::Mark => Ok(Self {
                entrypoint: params.entrypoint,
                value: ContractValue {
                    value: Some(Value::Error(e.to_string())),
                    prim: Some(params.value),
                },
                ..Default::default()
            }),
            Err(e) => Err(e),
        }
    }
}

/// Decodes binary storage, typed when a descriptor is known.
pub(crate) fn decode_storage_value(
    buf: &[u8],
    descriptor: Option<&TypeDescriptor>,
    on_error: OnError,
) -> Result<ContractValue, ValueDecodeError> {
    let prim = Prim::from_binary(buf)?;
    match descriptor {
        Some(d) => Ok(ContractValue {
            value: Some(d.decode_storage(&prim, on_error)?),
            prim: Some(prim),
        }),
        None => Ok(ContractValue::untyped(prim)),
    }
}

impl Client {
    /// Fetches one explorer object and decodes it through `R`'s columns.
    pub(crate) async fn get_record<R: TableRecord>(&self, path: String) -> Result<R, ClientError> {
        self.call_async_with(Call::get(path), |_, body| {
            let text = std::str::from_utf8(&body)?;
            let table = R::column_table();
            decoding::decode_row(&table.bind(&table.all_columns()), text)
        })
        .wait()
        .await
        .map(|r| r.value)
    }

    /// Fetches an explorer list and decodes each element through `R`'s columns.
    pub(crate) async fn get_records<R: TableRecord>(&self, path: String) -> Result<Vec<R>, ClientError> {
        self.call_async_with(Call::get(path), |_, body| {
            let text = std::str::from_utf8(&body)?;
            let table = R::column_table();
            decoding::decode_list(&table.bind(&table.all_columns()), text)
        })
        .wait()
        .await
        .map(|r| r.value.into_rows())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::micheline::OpCode;

    fn descriptor() -> TypeDescriptor {
        let param = Prim::app(
            OpCode::T_OR,
            vec![
                Prim::annotated(OpCode::T_NAT, vec![], &["%mint"]),
                Prim::annotated(OpCode::T_STRING, vec![], &["%rename"]),
            ],
        );
        let storage = Prim::app(OpCode::T_NAT, vec![]);
        TypeDescriptor::new(param, storage, BTreeMap::new())
    }

    fn named_params(entrypoint: &str, value: Prim) -> Vec<u8> {
        Parameters {
            entrypoint: entrypoint.to_string(),
            value,
        }
        .to_binary()
    }

    #[test]
    fn test_parameters_typed_by_entrypoint() {
        let d = descriptor();
        let buf = named_params("rename", Prim::String("x".into()));
        let p = ContractParameters::decode(&buf, Some(&d), OnError::Abort).unwrap();
        assert_eq!(p.entrypoint, "rename");
        assert_eq!(p.entrypoint_id, Some(1));
        assert_eq!(p.branch, "R");
        assert_eq!(p.value.value, Some(Value::String("x".into())));
    }

    #[test]
    fn test_parameters_without_descriptor_are_untyped() {
        let buf = named_params("mint", Prim::int(5));
        let p = ContractParameters::decode(&buf, None, OnError::Abort).unwrap();
        assert_eq!(p.entrypoint, "mint");
        assert_eq!(p.entrypoint_id, None);
        assert_eq!(p.value.prim, Some(Prim::int(5)));
    }

    #[test]
    fn test_unknown_entrypoint_policy() {
        let d = descriptor();
        let buf = named_params("burn", Prim::int(1));
        assert!(matches!(
            ContractParameters::decode(&buf, Some(&d), OnError::Abort),
            Err(ValueDecodeError::EntrypointNotFound(_))
        ));
        let p = ContractParameters::decode(&buf, Some(&d), OnError::Mark).unwrap();
        assert!(p.value.value.unwrap().is_error());
    }

    #[test]
    fn test_parameters_from_explorer_json() {
        let p: ContractParameters = serde_json::from_str(
            r#"{"entrypoint": "transfer", "id": 0, "value": {"amount": "10"}, "prim": {"int": "10"}}"#,
        )
        .unwrap();
        assert_eq!(p.entrypoint, "transfer");
        assert_eq!(p.value.prim, Some(Prim::int(10)));
        assert!(p.value.get("amount").is_some());
    }
}
