use std::sync::OnceLock;

use chrono::{DateTime, Utc};

use crate::client::{Client, ClientError};
use crate::decoding::{set, set_json, set_record, ColumnTable, QueryTable, TableRecord};

/// Indexer sync state. Sent as an object by the explorer and as a
/// positional row on the `status` feed topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    /// One of loading, connecting, stopping, stopped, waiting, syncing,
    /// synced or failed.
    pub status: String,
    pub blocks: i64,
    pub finalized: i64,
    pub indexed: i64,
    pub progress: f64,
}

impl Status {
    pub fn is_synced(&self) -> bool {
        self.status == "synced"
    }
}

impl TableRecord for Status {
    fn column_table() -> &'static ColumnTable<Self> {
        static TABLE: OnceLock<ColumnTable<Status>> = OnceLock::new();
        TABLE.get_or_init(|| {
            ColumnTable::<Status>::builder()
                .field("status", |r, v| set(&mut r.status, v))
                .field("blocks", |r, v| set(&mut r.blocks, v))
                .field("finalized", |r, v| set(&mut r.finalized, v))
                .field("indexed", |r, v| set(&mut r.indexed, v))
                .field("progress", |r, v| set(&mut r.progress, v))
                .build()
        })
    }

    fn row_id(&self) -> u64 {
        0
    }
}

/// Chain head summary from `/explorer/tip`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tip {
    pub name: String,
    pub network: String,
    pub symbol: String,
    pub chain_id: String,
    pub genesis_time: DateTime<Utc>,
    pub block_hash: String,
    pub height: i64,
    pub cycle: i64,
    pub timestamp: DateTime<Utc>,
    pub protocol: String,
    pub total_accounts: i64,
    pub total_contracts: i64,
    pub funded_accounts: i64,
    pub dust_accounts: i64,
    pub dust_delegators: i64,
    pub total_ops: i64,
    pub delegators: i64,
    pub bakers: i64,
    pub rolls: i64,
    pub roll_owners: i64,
    pub new_accounts_30d: i64,
    pub cleared_accounts_30d: i64,
    pub funded_accounts_30d: i64,
    pub inflation_1y: f64,
    pub inflation_rate_1y: f64,
    pub health: i64,
    pub supply: Option<serde_json::Value>,
    pub status: Status,
}

impl TableRecord for Tip {
    fn column_table() -> &'static ColumnTable<Self> {
        static TABLE: OnceLock<ColumnTable<Tip>> = OnceLock::new();
        TABLE.get_or_init(|| {
            ColumnTable::<Tip>::builder()
                .field("name", |r, v| set(&mut r.name, v))
                .field("network", |r, v| set(&mut r.network, v))
                .field("symbol", |r, v| set(&mut r.symbol, v))
                .field("chain_id", |r, v| set(&mut r.chain_id, v))
                .field("genesis_time", |r, v| set(&mut r.genesis_time, v))
                .field("block_hash", |r, v| set(&mut r.block_hash, v))
                .field("height", |r, v| set(&mut r.height, v))
                .field("cycle", |r, v| set(&mut r.cycle, v))
                .field("timestamp", |r, v| set(&mut r.timestamp, v))
                .field("protocol", |r, v| set(&mut r.protocol, v))
                .field("total_accounts", |r, v| set(&mut r.total_accounts, v))
                .field("total_contracts", |r, v| set(&mut r.total_contracts, v))
                .field("funded_accounts", |r, v| set(&mut r.funded_accounts, v))
                .field("dust_accounts", |r, v| set(&mut r.dust_accounts, v))
                .field("dust_delegators", |r, v| set(&mut r.dust_delegators, v))
                .field("total_ops", |r, v| set(&mut r.total_ops, v))
                .field("delegators", |r, v| set(&mut r.delegators, v))
                .field("bakers", |r, v| set(&mut r.bakers, v))
                .field("rolls", |r, v| set(&mut r.rolls, v))
                .field("roll_owners", |r, v| set(&mut r.roll_owners, v))
                .field("new_accounts_30d", |r, v| set(&mut r.new_accounts_30d, v))
                .field("cleared_accounts_30d", |r, v| set(&mut r.cleared_accounts_30d, v))
                .field("funded_accounts_30d", |r, v| set(&mut r.funded_accounts_30d, v))
                .field("inflation_1y", |r, v| set(&mut r.inflation_1y, v))
                .field("inflation_rate_1y", |r, v| set(&mut r.inflation_rate_1y, v))
                .field("health", |r, v| set(&mut r.health, v))
                .field("supply", |r, v| set_json(&mut r.supply, v))
                .field("status", |r, v| set_record(&mut r.status, v))
                .build()
        })
    }

    fn row_id(&self) -> u64 {
        0
    }
}

/// Row of the `chain` table: running totals per block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chain {
    pub row_id: u64,
    pub height: i64,
    pub cycle: i64,
    pub time: DateTime<Utc>,
    pub total_accounts: i64,
    pub total_contracts: i64,
    pub total_ops: i64,
    pub total_contract_ops: i64,
    pub total_contract_calls: i64,
    pub total_activations: i64,
    pub total_seed_nonce_revelations: i64,
    pub total_endorsements: i64,
    pub total_double_baking_evidences: i64,
    pub total_double_endorsement_evidences: i64,
    pub total_delegations: i64,
    pub total_reveals: i64,
    pub total_originations: i64,
    pub total_transactions: i64,
    pub total_proposals: i64,
    pub total_ballots: i64,
    pub total_constants: i64,
    pub total_storage_bytes: i64,
    pub total_paid_bytes: i64,
    pub funded_accounts: i64,
    pub dust_accounts: i64,
    pub unclaimed_accounts: i64,
    pub total_delegators: i64,
    pub active_delegators: i64,
    pub inactive_delegators: i64,
    pub dust_delegators: i64,
    pub total_delegates: i64,
    pub active_delegates: i64,
    pub inactive_delegates: i64,
    pub zero_delegates: i64,
    pub self_delegates: i64,
    pub single_delegates: i64,
    pub multi_delegates: i64,
    pub rolls: i64,
    pub roll_owners: i64,
}

impl QueryTable for Chain {
    const TABLE: &'static str = "chain";
}

impl TableRecord for Chain {
    fn column_table() -> &'static ColumnTable<Self> {
        static TABLE: OnceLock<ColumnTable<Chain>> = OnceLock::new();
        TABLE.get_or_init(|| {
            ColumnTable::<Chain>::builder()
                .field("row_id", |r, v| set(&mut r.row_id, v))
                .field("height", |r, v| set(&mut r.height, v))
                .field("cycle", |r, v| set(&mut r.cycle, v))
                .field("time", |r, v| set(&mut r.time, v))
                .field("total_accounts", |r, v| set(&mut r.total_accounts, v))
                .field("total_contracts", |r, v| set(&mut r.total_contracts, v))
                .field("total_ops", |r, v| set(&mut r.total_ops, v))
                .field("total_contract_ops", |r, v| set(&mut r.total_contract_ops, v))
                .field("total_contract_calls", |r, v| set(&mut r.total_contract_calls, v))
                .field("total_activations", |r, v| set(&mut r.total_activations, v))
                .field("total_seed_nonce_revelations", |r, v| set(&mut r.total_seed_nonce_revelations, v))
                .field("total_endorsements", |r, v| set(&mut r.total_endorsements, v))
                .field("total_double_baking_evidences", |r, v| set(&mut r.total_double_baking_evidences, v))
                .field("total_double_endorsement_evidences", |r, v| {
                    set(&mut r.total_double_endorsement_evidences, v)
                })
                .field("total_delegations", |r, v| set(&mut r.total_delegations, v))
                .field("total_reveals", |r, v| set(&mut r.total_reveals, v))
                .field("total_originations", |r, v| set(&mut r.total_originations, v))
                .field("total_transactions", |r, v| set(&mut r.total_transactions, v))
                .field("total_proposals", |r, v| set(&mut r.total_proposals, v))
                .field("total_ballots", |r, v| set(&mut r.total_ballots, v))
                .field("total_constants", |r, v| set(&mut r.total_constants, v))
                .field("total_storage_bytes", |r, v| set(&mut r.total_storage_bytes, v))
                .field("total_paid_bytes", |r, v| set(&mut r.total_paid_bytes, v))
                .field("funded_accounts", |r, v| set(&mut r.funded_accounts, v))
                .field("dust_accounts", |r, v| set(&mut r.dust_accounts, v))
                .field("unclaimed_accounts", |r, v| set(&mut r.unclaimed_accounts, v))
                .field("total_delegators", |r, v| set(&mut r.total_delegators, v))
                .field("active_delegators", |r, v| set(&mut r.active_delegators, v))
                .field("inactive_delegators", |r, v| set(&mut r.inactive_delegators, v))
                .field("dust_delegators", |r, v| set(&mut r.dust_delegators, v))
                .field("total_delegates", |r, v| set(&mut r.total_delegates, v))
                .field("active_delegates", |r, v| set(&mut r.active_delegates, v))
                .field("inactive_delegates", |r, v| set(&mut r.inactive_delegates, v))
                .field("zero_delegates", |r, v| set(&mut r.zero_delegates, v))
                .field("self_delegates", |r, v| set(&mut r.self_delegates, v))
                .field("single_delegates", |r, v| set(&mut r.single_delegates, v))
                .field("multi_delegates", |r, v| set(&mut r.multi_delegates, v))
                .field("rolls", |r, v| set(&mut r.rolls, v))
                .field("roll_owners", |r, v| set(&mut r.roll_owners, v))
                .build()
        })
    }

    fn row_id(&self) -> u64 {
        self.row_id
    }
}

impl Client {
    pub async fn get_status(&self) -> Result<Status, ClientError> {
        self.get_record("explorer/status".to_string()).await
    }

    pub async fn get_tip(&self) -> Result<Tip, ClientError> {
        self.get_record("explorer/tip".to_string()).await
    }
}
