//! Typed client for the TzStats blockchain indexer.
//!
//! The indexer serves its tables two ways: explorer endpoints answer with
//! named JSON objects, table endpoints and the push feed with positional
//! rows aligned to a column list. Every record type in [`types`] decodes from
//! both through a single field table, and contract values embedded in rows
//! decode against type descriptors fetched once per contract and cached.
//!
//! ```no_run
//! use tzstats_client::types::Block;
//! use tzstats_client::{Client, ClientConfig, Filter, FilterMode};
//!
//! # async fn run() -> Result<(), tzstats_client::ClientError> {
//! let client = Client::new(ClientConfig::new("https://api.tzstats.com"))?;
//! let blocks = client
//!     .query::<Block>()
//!     .with_columns(["row_id", "height", "hash"])
//!     .with_filter(Filter::new("height", FilterMode::GreaterThanEqual, 100))
//!     .with_limit(2)
//!     .run()
//!     .await?;
//! println!("next cursor {}", blocks.cursor());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod contract;
pub mod decoding;
pub mod feed;
pub mod micheline;
pub mod query;
pub mod types;

pub use client::{Call, Client, ClientConfig, ClientError, FutureResult, Response};
pub use contract::TypeDescriptor;
pub use decoding::{DecodeError, RowList};
pub use feed::{FeedError, FeedMessage};
pub use micheline::{OnError, Prim, Value, ValueDecodeError};
pub use query::{ExplorerParams, Filter, FilterMode, Pages, TableQuery};
