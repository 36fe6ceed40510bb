//! Client error types.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::decoding::DecodeError;
use crate::micheline::ValueDecodeError;
use crate::query::QueryError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{request}: transport error: {source}")]
    Transport {
        request: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{request}: no response headers within {timeout:?}")]
    Timeout { request: String, timeout: Duration },

    #[error("{request}: cancelled")]
    Cancelled { request: String },

    #[error(transparent)]
    Http(Box<HttpError>),

    #[error(transparent)]
    RateLimited(RateLimitError),

    #[error("{request}: decoding response: {source}")]
    Decode {
        request: String,
        #[source]
        source: DecodeError,
    },

    #[error("encoding request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("contract value: {0}")]
    Value(#[from] ValueDecodeError),

    #[error("loading contract {address}: {source}")]
    Descriptor {
        address: String,
        #[source]
        source: Arc<ClientError>,
    },

    #[error("invalid query: {0}")]
    Query(#[from] QueryError),

    #[error("writing response body: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{request}: call task failed: {message}")]
    Task { request: String, message: String },
}

impl ClientError {
    /// Check if this error is a transient network failure worth retrying.
    ///
    /// HTTP status errors, rate limits and decode failures are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { source, .. } => {
                source.is_connect() || source.is_timeout() || source.is_request()
            }
            ClientError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled { .. })
    }

    /// HTTP status of a failed response, including rate limits.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Http(e) => Some(e.status),
            ClientError::RateLimited(_) => Some(StatusCode::TOO_MANY_REQUESTS),
            _ => None,
        }
    }

    pub fn rate_limit(&self) -> Option<&RateLimitError> {
        match self {
            ClientError::RateLimited(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn decode(request: &str, source: DecodeError) -> Self {
        ClientError::Decode {
            request: request.to_string(),
            source,
        }
    }
}

/// One entry of the server's `{"errors": [...]}` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiError {
    pub code: i64,
    pub status: i64,
    pub message: String,
    pub scope: String,
    pub detail: String,
    pub request_id: String,
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    errors: Vec<ApiError>,
}

/// Response with a status of 400 or above (other than 429).
#[derive(Debug)]
pub struct HttpError {
    pub status: StatusCode,
    pub request: String,
    pub body: Bytes,
    pub errors: Vec<ApiError>,
}

impl HttpError {
    pub fn new(status: StatusCode, request: String, body: Bytes) -> Self {
        let errors = serde_json::from_slice::<ApiErrorBody>(&body)
            .map(|b| b.errors)
            .unwrap_or_default();
        Self {
            status,
            request,
            body,
            errors,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: HTTP {}", self.request, self.status)?;
        match self.errors.first() {
            Some(e) if !e.detail.is_empty() => write!(f, ": {}: {}", e.message, e.detail),
            Some(e) => write!(f, ": {}", e.message),
            None if !self.body.is_empty() => {
                let text = String::from_utf8_lossy(&self.body);
                let text: String = text.chars().take(200).collect();
                write!(f, ": {}", text.trim())
            }
            None => Ok(()),
        }
    }
}

impl std::error::Error for HttpError {}

/// Server asked the client to slow down (HTTP 429).
#[derive(Debug, Clone)]
pub struct RateLimitError {
    pub request: String,
    deadline: Instant,
    wait: Duration,
}

impl RateLimitError {
    pub fn new(request: String, wait: Duration) -> Self {
        Self {
            request,
            deadline: Instant::now() + wait,
            wait,
        }
    }

    /// Earliest time a retry is expected to succeed.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait announced by the server at the time of the response.
    pub fn retry_after(&self) -> Duration {
        self.wait
    }

    /// Timer completing at the deadline.
    pub fn timer(&self) -> tokio::time::Sleep {
        tokio::time::sleep_until(self.deadline)
    }

    /// Sleeps until the deadline unless `cancel` fires first.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ClientError::Cancelled {
                request: self.request.clone(),
            }),
            _ = tokio::time::sleep_until(self.deadline) => Ok(()),
        }
    }
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: rate limited, retry after {:?}", self.request, self.wait)
    }
}

impl std::error::Error for RateLimitError {}
