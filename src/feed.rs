//! Push feed message decoding.
//!
//! The indexer publishes every new block, operation and status change as a
//! `(topic, body)` message. Row topics carry a compact row aligned to a
//! fixed column list; hash topics carry the bare base58 hash. Only message
//! decoding lives here, the socket is left to the caller.

use bytes::Bytes;
use thiserror::Error;

use crate::client::{Client, ClientError};
use crate::contract::TypeDescriptor;
use crate::decoding::{self, field, BoundColumns, DecodeError, TableRecord};
use crate::micheline::{OnError, ValueDecodeError};
use crate::types::{Block, Op, Status};

pub const TOPIC_RAW_BLOCK: &str = "raw_block";
pub const TOPIC_RAW_BLOCK_ROLLBACK: &str = "raw_block/rollback";
pub const TOPIC_RAW_OP: &str = "raw_op";
pub const TOPIC_RAW_OP_ROLLBACK: &str = "raw_op/rollback";
pub const TOPIC_STATUS: &str = "status";
pub const TOPIC_BLOCK: &str = "block";
pub const TOPIC_OP: &str = "op";

pub const RAW_BLOCK_COLUMNS: [&str; 36] = [
    "row_id",
    "hash",
    "predecessor",
    "height",
    "cycle",
    "time",
    "solvetime",
    "version",
    "round",
    "nonce",
    "voting_period_kind",
    "baker",
    "proposer",
    "n_ops_applied",
    "n_ops_failed",
    "n_calls",
    "n_rollup_calls",
    "n_events",
    "volume",
    "fee",
    "reward",
    "deposit",
    "activated_supply",
    "burned_supply",
    "minted_supply",
    "n_accounts",
    "n_new_accounts",
    "n_new_contracts",
    "n_cleared_accounts",
    "n_funded_accounts",
    "gas_limit",
    "gas_used",
    "storage_paid",
    "lb_esc_vote",
    "lb_esc_ema",
    "protocol",
];

pub const RAW_OP_COLUMNS: [&str; 41] = [
    "id",
    "type",
    "hash",
    "block",
    "height",
    "cycle",
    "time",
    "op_n",
    "op_p",
    "op_c",
    "op_i",
    "status",
    "is_success",
    "is_contract",
    "is_internal",
    "is_event",
    "is_rollup",
    "counter",
    "gas_limit",
    "gas_used",
    "storage_limit",
    "storage_paid",
    "volume",
    "fee",
    "reward",
    "deposit",
    "burned",
    "sender_id",
    "sender",
    "receiver_id",
    "receiver",
    "creator_id",
    "creator",
    "baker_id",
    "baker",
    "data",
    "parameters",
    "storage",
    "big_map_diff",
    "errors",
    "entrypoint",
];

pub const STATUS_COLUMNS: [&str; 5] = ["status", "blocks", "finalized", "indexed", "progress"];

const BLOCK_HASH_PREFIX: [u8; 2] = [1, 52];
const OP_HASH_PREFIX: [u8; 2] = [5, 116];
const HASH_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("topic '{topic}' does not carry {expected}")]
    UnexpectedTopic { topic: String, expected: &'static str },

    #[error("invalid {kind} hash '{value}'")]
    InvalidHash { kind: &'static str, value: String },

    #[error("decoding {topic} message: {source}")]
    Decode {
        topic: String,
        #[source]
        source: DecodeError,
    },

    #[error("contract value: {0}")]
    Value(#[from] ValueDecodeError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Column list of a row topic, `None` for hash and unknown topics.
pub fn topic_columns(topic: &str) -> Option<&'static [&'static str]> {
    match topic {
        TOPIC_RAW_BLOCK | TOPIC_RAW_BLOCK_ROLLBACK => Some(&RAW_BLOCK_COLUMNS),
        TOPIC_RAW_OP | TOPIC_RAW_OP_ROLLBACK => Some(&RAW_OP_COLUMNS),
        TOPIC_STATUS => Some(&STATUS_COLUMNS),
        _ => None,
    }
}

/// One message received from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    topic: String,
    body: Bytes,
}

impl FeedMessage {
    pub fn new(topic: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Messages announcing that a previously published row was reorganized away.
    pub fn is_rollback(&self) -> bool {
        self.topic.ends_with("/rollback")
    }

    fn text(&self) -> Result<&str, FeedError> {
        std::str::from_utf8(&self.body).map_err(|e| self.decode_error(e.into()))
    }

    fn decode_error(&self, source: DecodeError) -> FeedError {
        FeedError::Decode {
            topic: self.topic.clone(),
            source,
        }
    }

    /// Text of one column of a row message, unquoted. `None` when the topic
    /// has no such column, the body is not a row or the value is null.
    pub fn get_field(&self, name: &str) -> Option<String> {
        let position = topic_columns(&self.topic)?.iter().position(|c| *c == name)?;
        let text = std::str::from_utf8(&self.body).ok()?;
        let values = decoding::split_array(text).ok()?;
        let raw = values.get(position)?;
        if field::is_null(raw) {
            return None;
        }
        field::scalar_text(raw).ok().map(|t| t.into_owned())
    }

    fn decode_row<R: TableRecord>(&self, expected: &'static str, topics: [&str; 2]) -> Result<R, FeedError> {
        if !topics.contains(&self.topic.as_str()) {
            return Err(FeedError::UnexpectedTopic {
                topic: self.topic.clone(),
                expected,
            });
        }
        let columns = bind::<R>(topic_columns(&self.topic).unwrap_or_default());
        decoding::decode_row(&columns, self.text()?).map_err(|e| self.decode_error(e))
    }

    pub fn decode_block(&self) -> Result<Block, FeedError> {
        self.decode_row("blocks", [TOPIC_RAW_BLOCK, TOPIC_RAW_BLOCK_ROLLBACK])
    }

    /// Decodes an operation row; contract values stay raw.
    pub fn decode_op(&self) -> Result<Op, FeedError> {
        self.decode_row("operations", [TOPIC_RAW_OP, TOPIC_RAW_OP_ROLLBACK])
    }

    pub fn decode_status(&self) -> Result<Status, FeedError> {
        self.decode_row("status", [TOPIC_STATUS, TOPIC_STATUS])
    }

    /// Decodes an operation row and its contract values against `descriptor`.
    pub fn decode_op_with_descriptor(
        &self,
        descriptor: Option<&TypeDescriptor>,
        on_error: OnError,
    ) -> Result<Op, FeedError> {
        let mut op = self.decode_op()?;
        op.decode_contract_values(descriptor, on_error)?;
        Ok(op)
    }

    /// Decodes an operation row, loading the receiver's types through the
    /// client's descriptor cache when the operation targets a contract.
    pub async fn decode_op_with(&self, client: &Client, on_error: OnError) -> Result<Op, FeedError> {
        let mut op = self.decode_op()?;
        let descriptor = if op.is_contract && !op.receiver.is_empty() {
            Some(client.resolve_descriptor(&op.receiver).await?)
        } else {
            None
        };
        op.decode_contract_values(descriptor.as_deref(), on_error)?;
        Ok(op)
    }

    pub fn block_hash(&self) -> Result<String, FeedError> {
        self.hash("block", TOPIC_BLOCK, &BLOCK_HASH_PREFIX)
    }

    pub fn op_hash(&self) -> Result<String, FeedError> {
        self.hash("operation", TOPIC_OP, &OP_HASH_PREFIX)
    }

    fn hash(&self, kind: &'static str, topic: &str, prefix: &[u8; 2]) -> Result<String, FeedError> {
        if self.topic != topic {
            return Err(FeedError::UnexpectedTopic {
                topic: self.topic.clone(),
                expected: kind,
            });
        }
        let text = self.text()?.trim();
        let valid = bs58::decode(text)
            .with_check(None)
            .into_vec()
            .map(|raw| raw.len() == prefix.len() + HASH_LEN && raw.starts_with(prefix))
            .unwrap_or(false);
        if !valid {
            return Err(FeedError::InvalidHash {
                kind,
                value: text.to_string(),
            });
        }
        Ok(text.to_string())
    }
}

fn bind<R: TableRecord>(columns: &[&str]) -> BoundColumns<R> {
    let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    R::column_table().bind(&columns)
}
