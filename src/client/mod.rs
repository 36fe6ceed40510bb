//! HTTP transport: configuration, retries, rate limiting and call handles.

pub mod config;
pub mod error;
pub mod future;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_server;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use governor::clock::{QuantaClock, QuantaInstant};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Jitter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

pub use config::{
    ClientConfig, ConfigError, RateLimitConfig, Retries, RetryConfig, TimeoutConfig,
    DEFAULT_API_URL, DEFAULT_IPFS_URL, DEFAULT_LIMIT,
};
pub use error::{ApiError, ClientError, HttpError, RateLimitError};
pub use future::{FutureResult, Response};
pub use transport::{with_retry, Call};

use crate::contract::DescriptorCache;
use crate::decoding::DecodeError;
use crate::query::Params;

pub type StandardRateLimiter =
    RateLimiter<NotKeyed, InMemoryState, QuantaClock, NoOpMiddleware<QuantaInstant>>;

pub(crate) struct ClientInner {
    pub(crate) http: reqwest::Client,
    pub(crate) params: Params,
    pub(crate) config: ClientConfig,
    pub(crate) rate_limiter: Option<Arc<StandardRateLimiter>>,
    pub(crate) jitter: Option<Jitter>,
    pub(crate) descriptors: DescriptorCache,
}

/// Client for the indexer API.
///
/// Cloning is cheap; clones share the connection pool, rate limiter and
/// contract descriptor cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let params = Params::parse(&config.base_url)?;
        let http = build_http(&config)?;

        let (rate_limiter, jitter) = if let Some(ref rate_config) = config.rate_limit {
            let quota = Quota::per_second(rate_config.requests_per_second);
            let limiter = RateLimiter::direct(quota);
            let jitter = Jitter::new(
                Duration::from_millis(rate_config.jitter_min_ms),
                Duration::from_millis(rate_config.jitter_max_ms),
            );
            (Some(Arc::new(limiter)), Some(jitter))
        } else {
            (None, None)
        };

        let descriptors = DescriptorCache::new(config.cache_capacity());
        tracing::debug!("client for {} ready", params.server());
        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                params,
                config,
                rate_limiter,
                jitter,
                descriptors,
            }),
        })
    }

    /// Client for the public mainnet API with default settings.
    pub fn mainnet() -> Result<Self, ClientError> {
        Self::new(ClientConfig::default())
    }

    /// Client for the IPFS gateway.
    pub fn ipfs() -> Result<Self, ClientError> {
        let mut config = ClientConfig::new(DEFAULT_IPFS_URL);
        config.timeouts.request_ms = 60_000;
        Self::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Base parameters every request starts from.
    pub fn params(&self) -> &Params {
        &self.inner.params
    }

    pub fn descriptors(&self) -> &DescriptorCache {
        &self.inner.descriptors
    }

    /// Issues `call` and decodes a JSON response into `T`.
    pub fn call_async<T>(&self, call: Call) -> FutureResult<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.call_async_with(call, |headers, body| transport::decode_json(headers, &body))
    }

    /// Issues `call` and decodes the buffered body with `decode`.
    pub fn call_async_with<T, F>(&self, call: Call, decode: F) -> FutureResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&HeaderMap, Bytes) -> Result<T, DecodeError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let request = self.request_name(&call);
        FutureResult::spawn(request, async move { inner.execute(call, decode).await })
    }

    /// Issues `call` and copies the response body into `sink` without
    /// buffering. The sink is returned in the response once shut down.
    pub fn stream_async<W>(&self, call: Call, sink: W) -> FutureResult<W>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let request = self.request_name(&call);
        FutureResult::spawn(request, async move { inner.execute_stream(call, sink).await })
    }

    /// Issues `call` and waits for the decoded value unless `cancel` fires first.
    pub async fn call<T>(&self, call: Call, cancel: &CancellationToken) -> Result<T, ClientError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.call_async(call).receive(cancel).await.map(Response::into_value)
    }

    pub async fn get<T>(&self, path: impl Into<String>) -> Result<T, ClientError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.call_async(Call::get(path)).wait().await.map(Response::into_value)
    }

    pub async fn post<T, B>(&self, path: impl Into<String>, body: &B) -> Result<T, ClientError>
    where
        T: DeserializeOwned + Send + 'static,
        B: Serialize + ?Sized,
    {
        let call = Call::post(path).with_json(body)?;
        self.call_async(call).wait().await.map(Response::into_value)
    }

    pub async fn put<T, B>(&self, path: impl Into<String>, body: &B) -> Result<T, ClientError>
    where
        T: DeserializeOwned + Send + 'static,
        B: Serialize + ?Sized,
    {
        let call = Call::put(path).with_json(body)?;
        self.call_async(call).wait().await.map(Response::into_value)
    }

    pub async fn delete(&self, path: impl Into<String>) -> Result<(), ClientError> {
        self.call_async::<serde_json::Value>(Call::delete(path))
            .wait()
            .await
            .map(|_| ())
    }

    fn request_name(&self, call: &Call) -> String {
        match self.inner.request_line(call) {
            Ok((_, line)) => line,
            Err(_) => format!("{} {}", call.method, call.path),
        }
    }
}

fn build_http(config: &ClientConfig) -> Result<reqwest::Client, ClientError> {
    let mut headers = HeaderMap::new();
    if let Some(key) = &config.api_key {
        let mut value = HeaderValue::from_str(key)
            .map_err(|e| ClientError::Config(format!("api key: {}", e)))?;
        value.set_sensitive(true);
        headers.insert(HeaderName::from_static("x-api-key"), value);
    }
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::Config(format!("header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::Config(format!("header '{}': {}", name, e)))?;
        headers.insert(name, value);
    }

    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .connect_timeout(config.timeouts.connect());
    if let Some(timeout) = config.timeouts.request() {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| ClientError::Config(format!("http client: {}", e)))
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.config.base_url)
            .field("retry", &self.inner.config.retry)
            .field("has_rate_limiter", &self.inner.rate_limiter.is_some())
            .field("descriptors", &self.inner.descriptors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tokio::net::TcpListener;

    use super::test_server::{StubResponse, StubServer};
    use super::*;

    fn client_for(server: &StubServer) -> Client {
        Client::new(ClientConfig::new(server.url())).unwrap()
    }

    #[tokio::test]
    async fn test_get_json() {
        let server = StubServer::start(vec![StubResponse::json(200, r#"{"height": 42}"#)]).await;
        let client = client_for(&server);
        let value: serde_json::Value = client.get("explorer/tip").await.unwrap();
        assert_eq!(value["height"], 42);
        assert_eq!(server.requests()[0], "GET /explorer/tip HTTP/1.1");
    }

    #[tokio::test]
    async fn test_request_headers() {
        let server = StubServer::start(vec![StubResponse::json(200, "{}")]).await;
        let config = ClientConfig::new(server.url())
            .with_api_key("secret")
            .with_header("x-trace", "abc");
        let client = Client::new(config).unwrap();
        let _: serde_json::Value = client.get("explorer/status").await.unwrap();
        let headers = server.headers(0);
        assert!(headers.contains(&"x-api-key: secret".to_string()));
        assert!(headers.contains(&"x-trace: abc".to_string()));
        assert!(headers.contains(&"accept: application/json".to_string()));
        assert!(headers.iter().any(|h| h.starts_with("user-agent: tzstats-client/")));
        assert!(!headers.iter().any(|h| h.starts_with("content-type")));
    }

    #[tokio::test]
    async fn test_http_error_carries_api_errors() {
        let server = StubServer::start(vec![StubResponse::json(
            404,
            r#"{"errors":[{"code":1001,"status":404,"message":"resource not found"}]}"#,
        )])
        .await;
        let client = client_for(&server);
        let err = client.get::<serde_json::Value>("explorer/block/xyz").await.unwrap_err();
        match err {
            ClientError::Http(e) => {
                assert!(e.is_not_found());
                assert_eq!(e.errors[0].message, "resource not found");
            }
            other => panic!("unexpected error: {other}"),
        }
        // status errors are never retried
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let server = StubServer::start(vec![
            StubResponse::json(429, "").with_header("Retry-After", "1"),
            StubResponse::json(200, "[1,2,3]"),
        ])
        .await;
        let client = client_for(&server);
        let cancel = CancellationToken::new();

        let err = client.call::<Vec<u32>>(Call::get("tables/block"), &cancel).await.unwrap_err();
        let limit = err.rate_limit().cloned().unwrap();
        assert_eq!(limit.retry_after(), Duration::from_secs(1));

        let start = Instant::now();
        limit.wait(&cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(900));

        let rows: Vec<u32> = client.call(Call::get("tables/block"), &cancel).await.unwrap();
        assert_eq!(rows, [1, 2, 3]);
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_default_wait() {
        let server = StubServer::start(vec![StubResponse::json(429, "")]).await;
        let client = client_for(&server);
        let err = client.get::<serde_json::Value>("x").await.unwrap_err();
        assert_eq!(err.rate_limit().unwrap().retry_after(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig::new(format!("http://{}", addr))
            .with_retry(RetryConfig::new(2).with_delay(Duration::from_millis(10)));
        let client = Client::new(config).unwrap();
        let err = client.get::<serde_json::Value>("explorer/tip").await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_cancel_in_flight_call() {
        let server = StubServer::start(vec![
            StubResponse::json(200, "{}").with_delay(Duration::from_secs(5)),
        ])
        .await;
        let client = client_for(&server);
        let cancel = CancellationToken::new();
        let pending = client.call_async::<serde_json::Value>(Call::get("slow"));
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let start = Instant::now();
        let err = pending.receive(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_stream_into_sink() {
        let body = "row_id,height\n1,100\n2,101\n";
        let server = StubServer::start(vec![
            StubResponse::new(200, body).with_header("Content-Type", "text/csv"),
        ])
        .await;
        let client = client_for(&server);
        let response = client
            .stream_async(Call::get("tables/block.csv"), Vec::new())
            .wait()
            .await
            .unwrap();
        assert_eq!(response.status, reqwest::StatusCode::OK);
        assert_eq!(response.value, body.as_bytes());
        assert!(!server.headers(0).iter().any(|h| h.starts_with("accept: application/json")));
    }

    #[tokio::test]
    async fn test_post_sets_content_type() {
        let server = StubServer::start(vec![StubResponse::json(200, r#"{"ok":true}"#)]).await;
        let client = client_for(&server);
        let value: serde_json::Value = client
            .post("metadata", &serde_json::json!({"address": "KT1x"}))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
        assert!(server.headers(0).contains(&"content-type: application/json".to_string()));
        assert_eq!(server.bodies()[0], r#"{"address":"KT1x"}"#);
    }

    #[tokio::test]
    async fn test_text_body_is_decode_error() {
        let server = StubServer::start(vec![StubResponse::new(200, "maintenance")]).await;
        let client = client_for(&server);
        let err = client.get::<serde_json::Value>("explorer/tip").await.unwrap_err();
        assert!(matches!(err, ClientError::Decode { .. }));
    }

    #[test]
    fn test_invalid_header_config() {
        let config = ClientConfig::default().with_header("bad header", "x");
        assert!(matches!(Client::new(config), Err(ClientError::Config(_))));
    }
}
