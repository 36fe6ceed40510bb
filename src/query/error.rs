use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("empty table name")]
    EmptyTable,

    #[error("filter {index}: empty column name")]
    EmptyFilterColumn { index: usize },

    #[error("filter on '{column}': empty value")]
    EmptyFilterValue { column: String },

    #[error("unknown filter mode '{0}'")]
    UnknownFilterMode(String),

    #[error("invalid format '{0}', expected json or csv")]
    InvalidFormat(String),

    #[error("invalid order '{0}', expected asc or desc")]
    InvalidOrder(String),

    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}
