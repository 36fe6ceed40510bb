use std::sync::OnceLock;

use chrono::{DateTime, Utc};

use super::op::Op;
use crate::client::{Client, ClientError};
use crate::decoding::{set, set_json, ColumnTable, QueryTable, TableRecord};
use crate::query::ExplorerParams;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Account {
    pub row_id: u64,
    pub address: String,
    pub address_type: String,
    pub pubkey: String,
    pub counter: i64,
    pub baker_id: u64,
    pub baker: String,
    pub creator_id: u64,
    pub creator: String,
    pub first_in: i64,
    pub first_out: i64,
    pub first_seen: i64,
    pub last_in: i64,
    pub last_out: i64,
    pub last_seen: i64,
    pub first_seen_time: DateTime<Utc>,
    pub last_seen_time: DateTime<Utc>,
    pub first_in_time: DateTime<Utc>,
    pub last_in_time: DateTime<Utc>,
    pub first_out_time: DateTime<Utc>,
    pub last_out_time: DateTime<Utc>,
    pub delegated_since: i64,
    pub delegated_since_time: DateTime<Utc>,
    pub total_received: f64,
    pub total_sent: f64,
    pub total_burned: f64,
    pub total_fees_paid: f64,
    pub total_fees_used: f64,
    pub spendable_balance: f64,
    pub frozen_bond: f64,
    pub lost_bond: f64,
    pub is_funded: bool,
    pub is_activated: bool,
    pub is_delegated: bool,
    pub is_revealed: bool,
    pub is_baker: bool,
    pub is_contract: bool,
    pub n_tx_success: i64,
    pub n_tx_failed: i64,
    pub n_tx_out: i64,
    pub n_tx_in: i64,
    pub metadata: Option<serde_json::Value>,
}

impl QueryTable for Account {
    const TABLE: &'static str = "account";
}

impl TableRecord for Account {
    fn column_table() -> &'static ColumnTable<Self> {
        static TABLE: OnceLock<ColumnTable<Account>> = OnceLock::new();
        TABLE.get_or_init(|| {
            ColumnTable::<Account>::builder()
                .field("row_id", |r, v| set(&mut r.row_id, v))
                .field("address", |r, v| set(&mut r.address, v))
                .field("address_type", |r, v| set(&mut r.address_type, v))
                .field("pubkey", |r, v| set(&mut r.pubkey, v))
                .field("counter", |r, v| set(&mut r.counter, v))
                .field("baker_id", |r, v| set(&mut r.baker_id, v))
                .field("baker", |r, v| set(&mut r.baker, v))
                .field("creator_id", |r, v| set(&mut r.creator_id, v))
                .field("creator", |r, v| set(&mut r.creator, v))
                .field("first_in", |r, v| set(&mut r.first_in, v))
                .field("first_out", |r, v| set(&mut r.first_out, v))
                .field("first_seen", |r, v| set(&mut r.first_seen, v))
                .field("last_in", |r, v| set(&mut r.last_in, v))
                .field("last_out", |r, v| set(&mut r.last_out, v))
                .field("last_seen", |r, v| set(&mut r.last_seen, v))
                .field("first_seen_time", |r, v| set(&mut r.first_seen_time, v))
                .field("last_seen_time", |r, v| set(&mut r.last_seen_time, v))
                .field("first_in_time", |r, v| set(&mut r.first_in_time, v))
                .field("last_in_time", |r, v| set(&mut r.last_in_time, v))
                .field("first_out_time", |r, v| set(&mut r.first_out_time, v))
                .field("last_out_time", |r, v| set(&mut r.last_out_time, v))
                .field("delegated_since", |r, v| set(&mut r.delegated_since, v))
                .field("delegated_since_time", |r, v| set(&mut r.delegated_since_time, v))
                .field("total_received", |r, v| set(&mut r.total_received, v))
                .field("total_sent", |r, v| set(&mut r.total_sent, v))
                .field("total_burned", |r, v| set(&mut r.total_burned, v))
                .field("total_fees_paid", |r, v| set(&mut r.total_fees_paid, v))
                .field("total_fees_used", |r, v| set(&mut r.total_fees_used, v))
                .field("spendable_balance", |r, v| set(&mut r.spendable_balance, v))
                .field("frozen_bond", |r, v| set(&mut r.frozen_bond, v))
                .field("lost_bond", |r, v| set(&mut r.lost_bond, v))
                .field("is_funded", |r, v| set(&mut r.is_funded, v))
                .field("is_activated", |r, v| set(&mut r.is_activated, v))
                .field("is_delegated", |r, v| set(&mut r.is_delegated, v))
                .field("is_revealed", |r, v| set(&mut r.is_revealed, v))
                .field("is_baker", |r, v| set(&mut r.is_baker, v))
                .field("is_contract", |r, v| set(&mut r.is_contract, v))
                .field("n_tx_success", |r, v| set(&mut r.n_tx_success, v))
                .field("n_tx_failed", |r, v| set(&mut r.n_tx_failed, v))
                .field("n_tx_out", |r, v| set(&mut r.n_tx_out, v))
                .field("n_tx_in", |r, v| set(&mut r.n_tx_in, v))
                .notable("metadata", |r, v| set_json(&mut r.metadata, v))
                .build()
        })
    }

    fn row_id(&self) -> u64 {
        self.row_id
    }
}

impl Client {
    pub async fn get_account(&self, address: &str, params: &ExplorerParams) -> Result<Account, ClientError> {
        self.get_record(params.append_to(&format!("explorer/account/{}", address)))
            .await
    }

    pub async fn get_account_ops(&self, address: &str, params: &ExplorerParams) -> Result<Vec<Op>, ClientError> {
        self.get_records(params.append_to(&format!("explorer/account/{}/operations", address)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_server::{StubResponse, StubServer};
    use crate::client::ClientConfig;
    use crate::decoding::decode_row;

    #[test]
    fn test_object_and_row_agree() {
        let table = Account::column_table();
        let object = r#"{"row_id": 4, "address": "tz1a", "is_funded": true,
            "spendable_balance": 12.5, "last_seen_time": "2023-03-01T00:00:00Z"}"#;
        let row = r#"[4, "tz1a", 1, 12.5, 1677628800000]"#;
        let a: Account = decode_row(&table.bind(&table.all_columns()), object).unwrap();
        let columns: Vec<String> = ["row_id", "address", "is_funded", "spendable_balance", "last_seen_time"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let b: Account = decode_row(&table.bind(&columns), row).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_get_account_and_ops() {
        let server = StubServer::start(vec![
            StubResponse::json(200, r#"{"address": "tz1a", "n_tx_in": 3, "metadata": {"alias": "x"}}"#),
            StubResponse::json(200, r#"[{"id": 8, "type": "delegation"}]"#),
        ])
        .await;
        let client = Client::new(ClientConfig::new(server.url())).unwrap();
        let account = client
            .get_account("tz1a", &ExplorerParams::new().with_meta())
            .await
            .unwrap();
        assert_eq!(account.n_tx_in, 3);
        assert!(account.metadata.is_some());

        let ops = client.get_account_ops("tz1a", &ExplorerParams::new()).await.unwrap();
        assert_eq!(ops[0].op_type, "delegation");
        assert_eq!(server.requests()[0], "GET /explorer/account/tz1a?meta=1 HTTP/1.1");
        assert_eq!(server.requests()[1], "GET /explorer/account/tz1a/operations HTTP/1.1");
    }
}
