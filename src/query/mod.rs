//! Table queries: filters, projections, ordering and cursor pagination.

pub mod error;
pub mod explorer;
pub mod filter;
pub mod params;

use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;

use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use error::QueryError;
pub use explorer::ExplorerParams;
pub use filter::{Filter, FilterList, FilterMode, Format, Order};
pub use params::Params;

use crate::client::{Call, Client, ClientError, Response};
use crate::decoding::{self, QueryTable, RowList, TableRecord};
use crate::micheline::OnError;

/// Query against one table endpoint, decoding rows into `R`.
///
/// Each query owns a copy of the client's base parameters; changes never
/// leak into the client or into other queries.
pub struct TableQuery<R> {
    client: Client,
    params: Params,
    table: String,
    format: Format,
    columns: Vec<String>,
    filter: FilterList,
    order: Order,
    limit: u32,
    cursor: u64,
    verbose: bool,
    prim: bool,
    unpack: bool,
    on_error: OnError,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for TableQuery<R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            params: self.params.clone(),
            table: self.table.clone(),
            format: self.format,
            columns: self.columns.clone(),
            filter: self.filter.clone(),
            order: self.order,
            limit: self.limit,
            cursor: self.cursor,
            verbose: self.verbose,
            prim: self.prim,
            unpack: self.unpack,
            on_error: self.on_error,
            _record: PhantomData,
        }
    }
}

impl<R: QueryTable> TableQuery<R> {
    pub fn new(client: &Client) -> Self {
        Self {
            client: client.clone(),
            params: client.params().clone(),
            table: R::TABLE.to_string(),
            format: Format::Json,
            columns: R::column_table().default_columns(),
            filter: FilterList::default(),
            order: Order::Asc,
            limit: client.config().default_limit,
            cursor: 0,
            verbose: false,
            prim: false,
            unpack: false,
            on_error: OnError::Abort,
            _record: PhantomData,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter.add(filter);
        self
    }

    /// Replaces the first filter on the same column, or adds it.
    pub fn replace_filter(mut self, filter: Filter) -> Self {
        self.filter.replace(filter);
        self
    }

    pub fn reset_filter(mut self) -> Self {
        self.filter.clear();
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Projects the given columns; an empty list restores the default
    /// projection of every non-notable column.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        if self.columns.is_empty() {
            self.columns = R::column_table().default_columns();
        }
        self
    }

    pub fn with_all_columns(mut self) -> Self {
        self.columns = R::column_table().all_columns();
        self
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn with_desc(self) -> Self {
        self.with_order(Order::Desc)
    }

    /// Continues after the row with id `cursor`.
    pub fn with_cursor(mut self, cursor: u64) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Requests contract values as raw primitive trees.
    pub fn with_prim(mut self, prim: bool) -> Self {
        self.prim = prim;
        self
    }

    /// Decodes contract values of returned rows using their contract types.
    pub fn with_unpack(mut self, unpack: bool) -> Self {
        self.unpack = unpack;
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    /// Sets an arbitrary query parameter.
    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.set(key, value);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn filters(&self) -> &FilterList {
        &self.filter
    }

    /// Columns the response rows are aligned with. A `columns` parameter
    /// already present in the base parameters wins over the query's list.
    pub fn columns(&self) -> Vec<String> {
        match self.params.get("columns") {
            Some(cols) => cols.split(',').map(str::to_string).collect(),
            None => self.columns.clone(),
        }
    }

    pub fn check(&self) -> Result<(), QueryError> {
        if self.table.is_empty() {
            return Err(QueryError::EmptyTable);
        }
        self.filter.check()
    }

    pub fn url(&self) -> Result<Url, QueryError> {
        self.url_for(self.format)
    }

    fn url_for(&self, format: Format) -> Result<Url, QueryError> {
        self.check()?;
        let mut p = self.params.clone();
        if self.cursor > 0 {
            p.set("cursor", self.cursor);
        }
        if self.limit > 0 && !p.contains("limit") {
            p.set("limit", self.limit);
        }
        if !self.columns.is_empty() && !p.contains("columns") {
            p.set("columns", self.columns.join(","));
        }
        if self.verbose {
            p.set("verbose", true);
        }
        if self.prim {
            p.set("prim", 1);
        }
        for f in self.filter.iter() {
            p.append(f.key(), &f.value);
        }
        p.set("order", self.order);
        p.url(&format!("tables/{}.{}", self.table, format))
    }

    /// Runs the query and decodes one page of rows.
    pub async fn run(&self) -> Result<RowList<R>, ClientError> {
        self.run_with(&CancellationToken::new()).await
    }

    pub async fn run_with(&self, cancel: &CancellationToken) -> Result<RowList<R>, ClientError> {
        let url = self.url_for(Format::Json)?;
        let bound = R::column_table().bind(&self.columns());
        let response = self
            .client
            .call_async_with(Call::get(url.as_str()), move |_, body| {
                let text = std::str::from_utf8(&body)?;
                decoding::decode_list(&bound, text)
            })
            .receive(cancel)
            .await?;
        let mut rows = response.value;
        if self.unpack {
            self.unpack_rows(&mut rows, url.as_str(), cancel).await?;
        }
        Ok(rows)
    }

    /// Resolves the descriptors of all contracts on the page concurrently,
    /// then decodes each row's raw contract values. Cancellation drops the
    /// pending lookups, which aborts their requests.
    async fn unpack_rows(
        &self,
        rows: &mut RowList<R>,
        request: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let addresses: BTreeSet<String> = rows
            .iter()
            .filter_map(|r| r.script_address().map(str::to_string))
            .collect();
        let lookups: Vec<_> = addresses
            .iter()
            .map(|address| self.client.resolve_descriptor(address))
            .collect();
        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("{} cancelled while loading contract types", request);
                return Err(ClientError::Cancelled {
                    request: request.to_string(),
                });
            }
            results = futures::future::join_all(lookups) => results,
        };

        let mut descriptors = HashMap::with_capacity(addresses.len());
        for (address, result) in addresses.iter().zip(results) {
            match result {
                Ok(d) => {
                    descriptors.insert(address.as_str(), d);
                }
                Err(e) if self.on_error == OnError::Mark => {
                    tracing::warn!("decoding {} values untyped: {}", address, e);
                }
                Err(e) => return Err(e),
            }
        }

        for row in rows.rows_mut() {
            let descriptor = row.script_address().and_then(|a| descriptors.get(a)).cloned();
            row.decode_contract_values(descriptor.as_deref(), self.on_error)?;
        }
        Ok(())
    }

    /// Runs the query and copies the raw response body into `sink`.
    pub async fn stream<W>(&self, sink: W) -> Result<Response<W>, ClientError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let url = self.url()?;
        self.client.stream_async(Call::get(url.as_str()), sink).wait().await
    }

    /// Iterates pages by advancing the cursor to the last row id of each page.
    pub fn pages(self) -> Pages<R> {
        Pages {
            query: self,
            done: false,
        }
    }
}

impl<R> std::fmt::Debug for TableQuery<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableQuery")
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("filter", &self.filter)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Sequential page iterator. A page is requested only after the previous
/// one was returned; iteration ends on an empty page. Page sizes say nothing
/// about the end of the table since the server may cap the limit.
#[derive(Debug)]
pub struct Pages<R> {
    query: TableQuery<R>,
    done: bool,
}

impl<R: QueryTable> Pages<R> {
    pub async fn next_page(&mut self) -> Result<Option<RowList<R>>, ClientError> {
        if self.done {
            return Ok(None);
        }
        let rows = self.query.run().await?;
        if rows.is_empty() {
            self.done = true;
            return Ok(None);
        }
        let cursor = rows.cursor();
        if cursor == self.query.cursor {
            // the next request would return this page again
            self.done = true;
        }
        self.query.cursor = cursor;
        Ok(Some(rows))
    }

    /// Cursor the next page starts after.
    pub fn cursor(&self) -> u64 {
        self.query.cursor
    }
}

impl Client {
    /// New query on the table of record type `R`.
    pub fn query<R: QueryTable>(&self) -> TableQuery<R> {
        TableQuery::new(self)
    }
}
