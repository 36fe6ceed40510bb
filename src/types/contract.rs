use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde_json::value::RawValue;

use super::op::Op;
use super::{decode_storage_value, ContractValue};
use crate::client::{Client, ClientError};
use crate::contract::{ContractScript, Script, TypeDescriptor};
use crate::decoding::{hex_bytes, set, set_json, ColumnTable, FieldError, QueryTable, TableRecord};
use crate::micheline::{OnError, ValueDecodeError};
use crate::query::ExplorerParams;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contract {
    pub row_id: u64,
    pub account_id: u64,
    pub address: String,
    pub creator_id: u64,
    pub creator: String,
    pub baker_id: u64,
    pub baker: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub first_seen_time: DateTime<Utc>,
    pub last_seen_time: DateTime<Utc>,
    pub storage_size: i64,
    pub storage_paid: i64,
    pub total_fees_used: f64,
    pub iface_hash: String,
    pub code_hash: String,
    pub storage_hash: String,
    pub features: Vec<String>,
    pub interfaces: Vec<String>,
    /// Calls per entrypoint name. Without type information entries are
    /// keyed by entrypoint index.
    pub call_stats: BTreeMap<String, u32>,
    pub n_calls_in: i64,
    pub n_calls_out: i64,
    pub n_calls_failed: i64,
    pub bigmaps: BTreeMap<String, i64>,
    pub metadata: Option<serde_json::Value>,
    pub script: Option<Script>,
    pub storage: Option<ContractValue>,
    pub raw_script: Vec<u8>,
    pub raw_storage: Vec<u8>,
    pub raw_call_stats: Vec<u8>,
}

fn count_calls(buf: &[u8], name: impl Fn(usize) -> String) -> BTreeMap<String, u32> {
    buf.chunks_exact(4)
        .enumerate()
        .map(|(i, c)| (name(i), u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
        .collect()
}

fn set_call_stats(c: &mut Contract, raw: &RawValue) -> Result<(), FieldError> {
    if raw.get().trim_start().starts_with('"') {
        c.raw_call_stats = hex_bytes(raw)?;
        c.call_stats = count_calls(&c.raw_call_stats, |i| i.to_string());
        return Ok(());
    }
    set_json(&mut c.call_stats, raw)
}

impl Contract {
    /// Descriptor built from the script column, when it was requested.
    pub fn inline_descriptor(&self) -> Result<Option<TypeDescriptor>, ValueDecodeError> {
        let script = match (&self.script, self.raw_script.is_empty()) {
            (Some(script), _) => script.clone(),
            (None, false) => Script::from_binary(&self.raw_script)?,
            (None, true) => return Ok(None),
        };
        TypeDescriptor::from_script(ContractScript {
            script: Some(script),
            bigmaps: self.bigmaps.clone(),
        })
        .map(Some)
    }
}

impl QueryTable for Contract {
    const TABLE: &'static str = "contract";
}

impl TableRecord for Contract {
    fn column_table() -> &'static ColumnTable<Self> {
        static TABLE: OnceLock<ColumnTable<Contract>> = OnceLock::new();
        TABLE.get_or_init(|| {
            ColumnTable::<Contract>::builder()
                .field("row_id", |r, v| set(&mut r.row_id, v))
                .field("account_id", |r, v| set(&mut r.account_id, v))
                .field("address", |r, v| set(&mut r.address, v))
                .field("creator_id", |r, v| set(&mut r.creator_id, v))
                .field("creator", |r, v| set(&mut r.creator, v))
                .notable("baker_id", |r, v| set(&mut r.baker_id, v))
                .notable("baker", |r, v| set(&mut r.baker, v))
                .field("first_seen", |r, v| set(&mut r.first_seen, v))
                .field("last_seen", |r, v| set(&mut r.last_seen, v))
                .field("first_seen_time", |r, v| set(&mut r.first_seen_time, v))
                .field("last_seen_time", |r, v| set(&mut r.last_seen_time, v))
                .field("storage_size", |r, v| set(&mut r.storage_size, v))
                .field("storage_paid", |r, v| set(&mut r.storage_paid, v))
                .notable("total_fees_used", |r, v| set(&mut r.total_fees_used, v))
                .field("script", |r, v| {
                    if v.get().trim_start().starts_with('"') {
                        r.raw_script = hex_bytes(v)?;
                        return Ok(());
                    }
                    set_json(&mut r.script, v)
                })
                .field("storage", |r, v| {
                    if v.get().trim_start().starts_with('"') {
                        r.raw_storage = hex_bytes(v)?;
                        return Ok(());
                    }
                    set_json(&mut r.storage, v)
                })
                .field("iface_hash", |r, v| set(&mut r.iface_hash, v))
                .field("code_hash", |r, v| set(&mut r.code_hash, v))
                .field("storage_hash", |r, v| set(&mut r.storage_hash, v))
                .field("features", |r, v| set(&mut r.features, v))
                .field("interfaces", |r, v| set(&mut r.interfaces, v))
                .field("call_stats", set_call_stats)
                .notable("n_calls_in", |r, v| set(&mut r.n_calls_in, v))
                .notable("n_calls_out", |r, v| set(&mut r.n_calls_out, v))
                .notable("n_calls_failed", |r, v| set(&mut r.n_calls_failed, v))
                .notable("bigmaps", |r, v| set_json(&mut r.bigmaps, v))
                .notable("metadata", |r, v| set_json(&mut r.metadata, v))
                .build()
        })
    }

    fn row_id(&self) -> u64 {
        self.row_id
    }

    /// Rows carrying their own script decode without a lookup.
    fn script_address(&self) -> Option<&str> {
        let needs_types = !self.raw_storage.is_empty() || !self.raw_call_stats.is_empty();
        let has_script = self.script.is_some() || !self.raw_script.is_empty();
        (needs_types && !has_script && !self.address.is_empty()).then_some(self.address.as_str())
    }

    fn decode_contract_values(
        &mut self,
        descriptor: Option<&TypeDescriptor>,
        on_error: OnError,
    ) -> Result<(), ValueDecodeError> {
        let inline = match descriptor {
            Some(_) => None,
            None => self.inline_descriptor()?,
        };
        let descriptor = descriptor.or(inline.as_ref());
        if let Some(d) = descriptor {
            if !self.raw_call_stats.is_empty() {
                self.call_stats = count_calls(&self.raw_call_stats, |i| {
                    d.entrypoint_by_id(i)
                        .map(|e| e.name.clone())
                        .unwrap_or_else(|| i.to_string())
                });
            }
        }
        if !self.raw_storage.is_empty() {
            self.storage = Some(decode_storage_value(&self.raw_storage, descriptor, on_error)?);
        }
        Ok(())
    }
}

impl Client {
    pub async fn get_contract(&self, address: &str, params: &ExplorerParams) -> Result<Contract, ClientError> {
        self.get_record(params.append_to(&format!("explorer/contract/{}", address)))
            .await
    }

    pub async fn get_contract_storage(
        &self,
        address: &str,
        params: &ExplorerParams,
    ) -> Result<ContractValue, ClientError> {
        self.get(params.append_to(&format!("explorer/contract/{}/storage", address)))
            .await
    }

    /// Transactions into the contract, newest last unless ordered otherwise.
    pub async fn list_contract_calls(&self, address: &str, params: &ExplorerParams) -> Result<Vec<Op>, ClientError> {
        self.get_records(params.append_to(&format!("explorer/contract/{}/calls", address)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_server::{StubResponse, StubServer};
    use crate::client::ClientConfig;
    use crate::decoding::decode_row;
    use crate::micheline::{OpCode, Prim};

    fn script() -> Script {
        let param = Prim::app(
            OpCode::T_OR,
            vec![
                Prim::annotated(OpCode::T_NAT, vec![], &["%bid"]),
                Prim::annotated(OpCode::T_UNIT, vec![], &["%close"]),
            ],
        );
        Script {
            code: Some(Prim::Seq(vec![
                Prim::app(OpCode::PARAMETER, vec![param]),
                Prim::app(OpCode::STORAGE, vec![Prim::annotated(OpCode::T_NAT, vec![], &["%best"])]),
            ])),
            storage: Some(Prim::int(5)),
        }
    }

    fn stats(counts: &[u32]) -> String {
        hex::encode(counts.iter().flat_map(|c| c.to_be_bytes()).collect::<Vec<u8>>())
    }

    fn bind(names: &[&str]) -> crate::decoding::BoundColumns<Contract> {
        let names: Vec<String> = names.iter().map(|c| c.to_string()).collect();
        Contract::column_table().bind(&names)
    }

    #[test]
    fn test_call_stats_by_index_without_script() {
        let data = format!(r#"[1, "KT1a", "{}"]"#, stats(&[3, 1]));
        let c: Contract = decode_row(&bind(&["row_id", "address", "call_stats"]), &data).unwrap();
        assert_eq!(c.call_stats.get("0"), Some(&3));
        assert_eq!(c.call_stats.get("1"), Some(&1));
        assert_eq!(c.script_address(), Some("KT1a"));
    }

    #[test]
    fn test_inline_script_names_call_stats() {
        let data = format!(
            r#"[1, "KT1a", "{}", "{}", "{}"]"#,
            hex::encode(script().to_binary()),
            hex::encode(Prim::int(9).to_binary()),
            stats(&[3, 1])
        );
        let mut c: Contract =
            decode_row(&bind(&["row_id", "address", "script", "storage", "call_stats"]), &data).unwrap();
        assert_eq!(c.script_address(), None);

        c.decode_contract_values(None, OnError::Abort).unwrap();
        assert_eq!(c.call_stats.get("bid"), Some(&3));
        assert_eq!(c.call_stats.get("close"), Some(&1));
        let storage = c.storage.unwrap();
        assert_eq!(storage.prim, Some(Prim::int(9)));
        assert_eq!(storage.value.as_ref().and_then(|v| v.get_i64("")), Some(9));
    }

    #[test]
    fn test_features_and_notable_columns() {
        let data = r#"[1, "fa1_2,fa2"]"#;
        let c: Contract = decode_row(&bind(&["row_id", "features"]), data).unwrap();
        assert_eq!(c.features, vec!["fa1_2", "fa2"]);

        let defaults = Contract::column_table().default_columns();
        assert!(!defaults.iter().any(|c| c == "bigmaps"));
        assert!(defaults.iter().any(|c| c == "script"));
    }

    #[tokio::test]
    async fn test_explorer_contract_endpoints() {
        let server = StubServer::start(vec![
            StubResponse::json(
                200,
                r#"{"address": "KT1a", "creator": "tz1c", "call_stats": {"bid": 4},
                    "bigmaps": {"ledger": 31}, "features": ["account_factory"]}"#,
            ),
            StubResponse::json(200, r#"{"value": {"best": "5"}, "prim": {"int": "5"}}"#),
            StubResponse::json(200, r#"[{"id": 3, "type": "transaction", "receiver": "KT1a", "entrypoint": "bid"}]"#),
        ])
        .await;
        let client = Client::new(ClientConfig::new(server.url())).unwrap();

        let c = client.get_contract("KT1a", &ExplorerParams::new()).await.unwrap();
        assert_eq!(c.call_stats.get("bid"), Some(&4));
        assert_eq!(c.bigmaps.get("ledger"), Some(&31));
        assert_eq!(c.features, vec!["account_factory"]);

        let storage = client
            .get_contract_storage("KT1a", &ExplorerParams::new().with_prim())
            .await
            .unwrap();
        assert_eq!(storage.prim, Some(Prim::int(5)));
        assert!(storage.get("best").is_some());

        let calls = client
            .list_contract_calls("KT1a", &ExplorerParams::new().with_limit(1))
            .await
            .unwrap();
        assert_eq!(calls[0].row_id, 3);
        assert_eq!(calls[0].entrypoint, "bid");
        assert_eq!(server.requests()[2], "GET /explorer/contract/KT1a/calls?limit=1 HTTP/1.1");
    }
}
