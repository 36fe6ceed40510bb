use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde_json::value::RawValue;

use super::bigmap::BigmapUpdate;
use super::{decode_storage_value, ContractParameters, ContractValue};
use crate::client::{Client, ClientError};
use crate::contract::TypeDescriptor;
use crate::decoding::{hex_bytes, set, set_json, set_records, ColumnTable, FieldError, QueryTable, TableRecord};
use crate::micheline::{OnError, ValueDecodeError};
use crate::query::ExplorerParams;

/// One operation. Table rows carry contract values as hex encoded binary
/// (`raw_*`), explorer objects carry them already decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Op {
    pub row_id: u64,
    pub hash: String,
    pub op_type: String,
    pub block: String,
    pub time: DateTime<Utc>,
    pub height: i64,
    pub cycle: i64,
    pub counter: i64,
    pub op_n: i32,
    pub op_p: i32,
    pub op_c: i32,
    pub op_i: i32,
    pub status: String,
    pub is_success: bool,
    pub is_contract: bool,
    pub is_internal: bool,
    pub is_implicit: bool,
    pub is_event: bool,
    pub is_rollup: bool,
    pub is_batch: bool,
    pub gas_limit: i64,
    pub gas_used: i64,
    pub gas_price: f64,
    pub storage_limit: i64,
    pub storage_size: i64,
    pub storage_paid: i64,
    pub volume: f64,
    pub fee: f64,
    pub reward: f64,
    pub deposit: f64,
    pub burned: f64,
    pub sender_id: u64,
    pub sender: String,
    pub receiver_id: u64,
    pub receiver: String,
    pub creator_id: u64,
    pub creator: String,
    pub delegate_id: u64,
    pub delegate: String,
    pub baker_id: u64,
    pub baker: String,
    pub data: Option<serde_json::Value>,
    pub errors: Option<serde_json::Value>,
    pub days_destroyed: f64,
    pub entrypoint_id: i64,
    pub entrypoint: String,
    pub parameters: Option<ContractParameters>,
    pub storage: Option<ContractValue>,
    pub big_map_diff: Vec<BigmapUpdate>,
    pub raw_parameters: Vec<u8>,
    pub raw_storage: Vec<u8>,
    /// Binary bigmap diff of table rows, kept undecoded.
    pub raw_big_map_diff: Vec<u8>,
    pub batch: Vec<Op>,
    pub internal: Vec<Op>,
}

impl Op {
    /// The operation and all its batched and internal content in order.
    pub fn contents(&self) -> Vec<&Op> {
        let mut out = vec![self];
        for op in self.batch.iter().chain(&self.internal) {
            out.extend(op.contents());
        }
        out
    }

    fn has_raw_values(&self) -> bool {
        !self.raw_parameters.is_empty() || !self.raw_storage.is_empty()
    }
}

fn is_hex_text(raw: &RawValue) -> bool {
    raw.get().trim_start().starts_with('"')
}

fn set_parameters(op: &mut Op, raw: &RawValue) -> Result<(), FieldError> {
    if is_hex_text(raw) {
        op.raw_parameters = hex_bytes(raw)?;
        return Ok(());
    }
    set_json(&mut op.parameters, raw)
}

fn set_storage(op: &mut Op, raw: &RawValue) -> Result<(), FieldError> {
    if is_hex_text(raw) {
        op.raw_storage = hex_bytes(raw)?;
        return Ok(());
    }
    set_json(&mut op.storage, raw)
}

fn set_big_map_diff(op: &mut Op, raw: &RawValue) -> Result<(), FieldError> {
    if is_hex_text(raw) {
        op.raw_big_map_diff = hex_bytes(raw)?;
        return Ok(());
    }
    set_json(&mut op.big_map_diff, raw)
}

impl QueryTable for Op {
    const TABLE: &'static str = "op";
}

impl TableRecord for Op {
    fn column_table() -> &'static ColumnTable<Self> {
        static TABLE: OnceLock<ColumnTable<Op>> = OnceLock::new();
        TABLE.get_or_init(|| {
            ColumnTable::<Op>::builder()
                .field("row_id", |r, v| set(&mut r.row_id, v))
                .alias("id", |r, v| set(&mut r.row_id, v))
                .field("type", |r, v| set(&mut r.op_type, v))
                .field("hash", |r, v| set(&mut r.hash, v))
                .field("block", |r, v| set(&mut r.block, v))
                .field("height", |r, v| set(&mut r.height, v))
                .field("cycle", |r, v| set(&mut r.cycle, v))
                .field("time", |r, v| set(&mut r.time, v))
                .field("op_n", |r, v| set(&mut r.op_n, v))
                .field("op_p", |r, v| set(&mut r.op_p, v))
                .field("op_c", |r, v| set(&mut r.op_c, v))
                .field("op_i", |r, v| set(&mut r.op_i, v))
                .field("status", |r, v| set(&mut r.status, v))
                .field("is_success", |r, v| set(&mut r.is_success, v))
                .field("is_contract", |r, v| set(&mut r.is_contract, v))
                .field("is_internal", |r, v| set(&mut r.is_internal, v))
                .field("is_event", |r, v| set(&mut r.is_event, v))
                .field("is_rollup", |r, v| set(&mut r.is_rollup, v))
                .notable("is_implicit", |r, v| set(&mut r.is_implicit, v))
                .notable("is_batch", |r, v| set(&mut r.is_batch, v))
                .field("counter", |r, v| set(&mut r.counter, v))
                .field("gas_limit", |r, v| set(&mut r.gas_limit, v))
                .field("gas_used", |r, v| set(&mut r.gas_used, v))
                .notable("gas_price", |r, v| set(&mut r.gas_price, v))
                .field("storage_limit", |r, v| set(&mut r.storage_limit, v))
                .notable("storage_size", |r, v| set(&mut r.storage_size, v))
                .field("storage_paid", |r, v| set(&mut r.storage_paid, v))
                .field("volume", |r, v| set(&mut r.volume, v))
                .field("fee", |r, v| set(&mut r.fee, v))
                .field("reward", |r, v| set(&mut r.reward, v))
                .field("deposit", |r, v| set(&mut r.deposit, v))
                .field("burned", |r, v| set(&mut r.burned, v))
                .field("sender_id", |r, v| set(&mut r.sender_id, v))
                .field("sender", |r, v| set(&mut r.sender, v))
                .field("receiver_id", |r, v| set(&mut r.receiver_id, v))
                .field("receiver", |r, v| set(&mut r.receiver, v))
                .field("creator_id", |r, v| set(&mut r.creator_id, v))
                .field("creator", |r, v| set(&mut r.creator, v))
                .notable("delegate_id", |r, v| set(&mut r.delegate_id, v))
                .notable("delegate", |r, v| set(&mut r.delegate, v))
                .field("baker_id", |r, v| set(&mut r.baker_id, v))
                .field("baker", |r, v| set(&mut r.baker, v))
                .field("data", |r, v| set_json(&mut r.data, v))
                .field("parameters", set_parameters)
                .field("storage", set_storage)
                .field("big_map_diff", set_big_map_diff)
                .field("errors", |r, v| set_json(&mut r.errors, v))
                .notable("days_destroyed", |r, v| set(&mut r.days_destroyed, v))
                .notable("entrypoint_id", |r, v| set(&mut r.entrypoint_id, v))
                .field("entrypoint", |r, v| set(&mut r.entrypoint, v))
                .notable("batch", |r, v| set_records(&mut r.batch, v))
                .notable("internal", |r, v| set_records(&mut r.internal, v))
                .build()
        })
    }

    fn row_id(&self) -> u64 {
        self.row_id
    }

    fn script_address(&self) -> Option<&str> {
        (self.has_raw_values() && self.receiver.starts_with("KT1")).then_some(self.receiver.as_str())
    }

    fn decode_contract_values(
        &mut self,
        descriptor: Option<&TypeDescriptor>,
        on_error: OnError,
    ) -> Result<(), ValueDecodeError> {
        if !self.raw_parameters.is_empty() {
            let params = ContractParameters::decode(&self.raw_parameters, descriptor, on_error)?;
            if self.entrypoint.is_empty() {
                self.entrypoint = params.entrypoint.clone();
            }
            self.parameters = Some(params);
        }
        if !self.raw_storage.is_empty() {
            self.storage = Some(decode_storage_value(&self.raw_storage, descriptor, on_error)?);
        }
        Ok(())
    }
}

impl Client {
    /// All operations sharing `hash`: the group's contents in order.
    pub async fn get_op(&self, hash: &str, params: &ExplorerParams) -> Result<Vec<Op>, ClientError> {
        self.get_records(params.append_to(&format!("explorer/op/{}", hash)))
            .await
    }

    /// Decodes the raw contract values of `op`, resolving the receiver's
    /// descriptor through the cache.
    pub async fn unpack_op(&self, op: &mut Op, on_error: OnError) -> Result<(), ClientError> {
        let descriptor = match op.script_address() {
            Some(address) => Some(self.resolve_descriptor(address).await?),
            None => None,
        };
        op.decode_contract_values(descriptor.as_deref(), on_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::client::test_server::{StubResponse, StubServer};
    use crate::client::ClientConfig;
    use crate::decoding::{decode_list, decode_row, BoundColumns};
    use crate::micheline::{OpCode, Parameters, Prim, Value};

    fn all() -> BoundColumns<Op> {
        let table = Op::column_table();
        table.bind(&table.all_columns())
    }

    fn counter_descriptor() -> TypeDescriptor {
        let param = Prim::annotated(OpCode::T_NAT, vec![], &["%increment"]);
        let storage = Prim::annotated(OpCode::T_NAT, vec![], &["%counter"]);
        TypeDescriptor::new(param, storage, BTreeMap::new())
    }

    const CALL_COLUMNS: [&str; 6] = ["row_id", "type", "receiver", "is_contract", "parameters", "storage"];

    fn call_row() -> String {
        let params = Parameters {
            entrypoint: "default".into(),
            value: Prim::int(3),
        }
        .to_binary();
        let storage = Prim::int(10).to_binary();
        format!(
            r#"[[77, "transaction", "KT1counter", 1, "{}", "{}"]]"#,
            hex::encode(params),
            hex::encode(storage)
        )
    }

    #[test]
    fn test_id_alias_and_object_values() {
        let data = r#"{
            "id": 12, "type": "transaction", "is_success": true,
            "parameters": {"entrypoint": "transfer", "value": {"to": "tz1x"}, "prim": {"string": "tz1x"}},
            "storage": {"value": "7", "prim": {"int": "7"}},
            "big_map_diff": [{"action": "update", "bigmap_id": 5, "key": "tz1x", "hash": "exprx", "value": "1"}]
        }"#;
        let op: Op = decode_row(&all(), data).unwrap();
        assert_eq!(op.row_id, 12);
        assert!(op.is_success);
        assert_eq!(op.parameters.unwrap().entrypoint, "transfer");
        assert_eq!(op.storage.unwrap().prim, Some(Prim::int(7)));
        assert_eq!(op.big_map_diff.len(), 1);
        assert_eq!(op.big_map_diff[0].bigmap_id, 5);
        assert!(op.raw_parameters.is_empty());
    }

    #[test]
    fn test_id_is_not_projected() {
        let columns = Op::column_table().default_columns();
        assert!(columns.iter().any(|c| c == "row_id"));
        assert!(!columns.iter().any(|c| c == "id"));
    }

    #[test]
    fn test_raw_values_decode_with_descriptor() {
        let columns: Vec<String> = CALL_COLUMNS.iter().map(|c| c.to_string()).collect();
        let bound = Op::column_table().bind(&columns);
        let list = decode_list(&bound, &call_row()).unwrap();
        let mut op = list.into_rows().remove(0);
        assert_eq!(op.script_address(), Some("KT1counter"));
        assert!(op.parameters.is_none());

        op.decode_contract_values(Some(&counter_descriptor()), OnError::Abort)
            .unwrap();
        let params = op.parameters.as_ref().unwrap();
        assert_eq!(params.entrypoint, "increment");
        assert_eq!(op.entrypoint, "increment");
        assert_eq!(op.storage.as_ref().unwrap().value.as_ref().and_then(|v| v.get_i64("")), Some(10));
    }

    #[test]
    fn test_raw_values_untyped_without_descriptor() {
        let columns: Vec<String> = ["row_id", "receiver", "parameters"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let bound = Op::column_table().bind(&columns);
        let params = Parameters {
            entrypoint: "mint".into(),
            value: Prim::int(1),
        }
        .to_binary();
        let data = format!(r#"[1, "tz1plain", "{}"]"#, hex::encode(params));
        let mut op: Op = decode_row(&bound, &data).unwrap();
        assert_eq!(op.script_address(), None);
        op.decode_contract_values(None, OnError::Abort).unwrap();
        let params = op.parameters.unwrap();
        assert_eq!(params.entrypoint, "mint");
        assert!(matches!(params.value.value, Some(Value::Int(_))));
    }

    #[test]
    fn test_contents_flatten_batch_and_internal() {
        let data = r#"{"id": 1, "batch": [{"id": 2, "internal": [{"id": 3}]}, {"id": 4}]}"#;
        let op: Op = decode_row(&all(), data).unwrap();
        let ids: Vec<u64> = op.contents().iter().map(|o| o.row_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_unpacked_query_resolves_receiver_script() {
        let script = r#"{"script": {"code": [
            {"prim": "parameter", "args": [{"prim": "nat", "annots": ["%increment"]}]},
            {"prim": "storage", "args": [{"prim": "nat", "annots": ["%counter"]}]},
            {"prim": "code", "args": [[]]}
        ]}}"#;
        let server = StubServer::start(vec![
            StubResponse::json(200, &call_row()),
            StubResponse::json(200, script),
        ])
        .await;
        let client = Client::new(ClientConfig::new(server.url())).unwrap();
        let rows = client
            .query::<Op>()
            .with_columns(CALL_COLUMNS)
            .with_unpack(true)
            .run()
            .await
            .unwrap();
        let op = &rows.rows()[0];
        assert_eq!(op.parameters.as_ref().unwrap().entrypoint, "increment");
        assert_eq!(
            server.requests()[1],
            "GET /explorer/contract/KT1counter/script?prim=1 HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_cancel_while_loading_receiver_script() {
        let server = StubServer::start(vec![
            StubResponse::json(200, &call_row()),
            StubResponse::json(200, r#"{"script": {}}"#).with_delay(Duration::from_secs(3)),
        ])
        .await;
        let client = Client::new(ClientConfig::new(server.url())).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = client
            .query::<Op>()
            .with_columns(CALL_COLUMNS)
            .with_unpack(true)
            .run_with(&cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(server.hits(), 2);
    }
}
