use std::sync::OnceLock;

use chrono::{DateTime, Utc};

use super::op::Op;
use crate::client::{Client, ClientError};
use crate::decoding::{set, set_json, set_records, ColumnTable, QueryTable, TableRecord};
use crate::query::ExplorerParams;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub row_id: u64,
    pub hash: String,
    pub predecessor: String,
    pub successor: String,
    pub time: DateTime<Utc>,
    pub height: i64,
    pub cycle: i64,
    pub is_cycle_snapshot: bool,
    pub solvetime: i64,
    pub version: i64,
    pub round: i64,
    pub nonce: String,
    pub voting_period_kind: String,
    pub baker_id: u64,
    pub baker: String,
    pub proposer_id: u64,
    pub proposer: String,
    pub n_endorsed_slots: i64,
    pub n_ops_applied: i64,
    pub n_ops_failed: i64,
    pub n_calls: i64,
    pub n_rollup_calls: i64,
    pub n_events: i64,
    pub volume: f64,
    pub fee: f64,
    pub reward: f64,
    pub deposit: f64,
    pub activated_supply: f64,
    pub minted_supply: f64,
    pub burned_supply: f64,
    pub n_accounts: i64,
    pub n_new_accounts: i64,
    pub n_new_contracts: i64,
    pub n_cleared_accounts: i64,
    pub n_funded_accounts: i64,
    pub gas_limit: i64,
    pub gas_used: i64,
    pub storage_paid: i64,
    pub pct_account_reuse: f64,
    pub lb_esc_vote: String,
    pub lb_esc_ema: i64,
    pub protocol: String,
    pub metadata: Option<serde_json::Value>,
    pub rights: Option<serde_json::Value>,
    /// Operations, filled by [`Client::get_block_with_ops`].
    pub ops: Vec<Op>,
}

impl QueryTable for Block {
    const TABLE: &'static str = "block";
}

impl TableRecord for Block {
    fn column_table() -> &'static ColumnTable<Self> {
        static TABLE: OnceLock<ColumnTable<Block>> = OnceLock::new();
        TABLE.get_or_init(|| {
            ColumnTable::<Block>::builder()
                .field("row_id", |r, v| set(&mut r.row_id, v))
                .field("hash", |r, v| set(&mut r.hash, v))
                .notable("predecessor", |r, v| set(&mut r.predecessor, v))
                .notable("successor", |r, v| set(&mut r.successor, v))
                .field("time", |r, v| set(&mut r.time, v))
                .field("height", |r, v| set(&mut r.height, v))
                .field("cycle", |r, v| set(&mut r.cycle, v))
                .field("is_cycle_snapshot", |r, v| set(&mut r.is_cycle_snapshot, v))
                .field("solvetime", |r, v| set(&mut r.solvetime, v))
                .field("version", |r, v| set(&mut r.version, v))
                .field("round", |r, v| set(&mut r.round, v))
                .field("nonce", |r, v| set(&mut r.nonce, v))
                .field("voting_period_kind", |r, v| set(&mut r.voting_period_kind, v))
                .field("baker_id", |r, v| set(&mut r.baker_id, v))
                .field("baker", |r, v| set(&mut r.baker, v))
                .field("proposer_id", |r, v| set(&mut r.proposer_id, v))
                .field("proposer", |r, v| set(&mut r.proposer, v))
                .field("n_endorsed_slots", |r, v| set(&mut r.n_endorsed_slots, v))
                .field("n_ops_applied", |r, v| set(&mut r.n_ops_applied, v))
                .field("n_ops_failed", |r, v| set(&mut r.n_ops_failed, v))
                .field("n_calls", |r, v| set(&mut r.n_calls, v))
                .field("n_rollup_calls", |r, v| set(&mut r.n_rollup_calls, v))
                .field("n_events", |r, v| set(&mut r.n_events, v))
                .field("volume", |r, v| set(&mut r.volume, v))
                .field("fee", |r, v| set(&mut r.fee, v))
                .field("reward", |r, v| set(&mut r.reward, v))
                .field("deposit", |r, v| set(&mut r.deposit, v))
                .field("activated_supply", |r, v| set(&mut r.activated_supply, v))
                .field("minted_supply", |r, v| set(&mut r.minted_supply, v))
                .field("burned_supply", |r, v| set(&mut r.burned_supply, v))
                .field("n_accounts", |r, v| set(&mut r.n_accounts, v))
                .field("n_new_accounts", |r, v| set(&mut r.n_new_accounts, v))
                .field("n_new_contracts", |r, v| set(&mut r.n_new_contracts, v))
                .field("n_cleared_accounts", |r, v| set(&mut r.n_cleared_accounts, v))
                .field("n_funded_accounts", |r, v| set(&mut r.n_funded_accounts, v))
                .field("gas_limit", |r, v| set(&mut r.gas_limit, v))
                .field("gas_used", |r, v| set(&mut r.gas_used, v))
                .field("storage_paid", |r, v| set(&mut r.storage_paid, v))
                .field("pct_account_reuse", |r, v| set(&mut r.pct_account_reuse, v))
                .field("lb_esc_vote", |r, v| set(&mut r.lb_esc_vote, v))
                .field("lb_esc_ema", |r, v| set(&mut r.lb_esc_ema, v))
                .field("protocol", |r, v| set(&mut r.protocol, v))
                .notable("metadata", |r, v| set_json(&mut r.metadata, v))
                .notable("rights", |r, v| set_json(&mut r.rights, v))
                .notable("ops", |r, v| set_records(&mut r.ops, v))
                .build()
        })
    }

    fn row_id(&self) -> u64 {
        self.row_id
    }
}

impl Client {
    pub async fn get_block(&self, hash: &str, params: &ExplorerParams) -> Result<Block, ClientError> {
        self.get_record(params.append_to(&format!("explorer/block/{}", hash)))
            .await
    }

    pub async fn get_head(&self, params: &ExplorerParams) -> Result<Block, ClientError> {
        self.get_record(params.append_to("explorer/block/head")).await
    }

    pub async fn get_block_height(&self, height: i64, params: &ExplorerParams) -> Result<Block, ClientError> {
        self.get_record(params.append_to(&format!("explorer/block/{}", height)))
            .await
    }

    /// Block including its operation list.
    pub async fn get_block_with_ops(&self, hash: &str, params: &ExplorerParams) -> Result<Block, ClientError> {
        self.get_record(params.append_to(&format!("explorer/block/{}/op", hash)))
            .await
    }

    pub async fn get_block_ops(&self, hash: &str, params: &ExplorerParams) -> Result<Vec<Op>, ClientError> {
        self.get_records(params.append_to(&format!("explorer/block/{}/operations", hash)))
            .await
    }
}
