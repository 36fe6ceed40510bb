use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http_body::Body as _;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::config::{Retries, RetryConfig};
use super::error::{ClientError, HttpError, RateLimitError};
use super::future::Response;
use super::ClientInner;
use crate::decoding::DecodeError;

/// One HTTP request: method, path relative to the client's base URL,
/// extra headers and an optional body.
#[derive(Debug, Clone)]
pub struct Call {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<Bytes>,
}

impl Call {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, ClientError> {
        let body = serde_json::to_vec(body).map_err(ClientError::Encode)?;
        Ok(self
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body))
    }

    fn sends_body(&self) -> bool {
        self.body.is_some()
            && (self.method == Method::POST || self.method == Method::PUT || self.method == Method::PATCH)
    }
}

/// Retries `operation` on transient failures with a fixed delay.
///
/// Status, rate-limit and decode errors are returned on the first attempt.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut retries: u32 = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if retries > 0 {
                    tracing::info!("'{}' succeeded after {} retries", operation_name, retries);
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && config.retries.allows(retries) => {
                retries += 1;
                let delay = config.delay();
                match config.retries {
                    Retries::Limited(max) => tracing::warn!(
                        "retry {}/{} for '{}' in {:?}: {}",
                        retries,
                        max,
                        operation_name,
                        delay,
                        e
                    ),
                    Retries::Unbounded => tracing::warn!(
                        "retry {} for '{}' in {:?}: {}",
                        retries,
                        operation_name,
                        delay,
                        e
                    ),
                }
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if retries > 0 {
                    tracing::error!(
                        "'{}' failed after {} attempts: {}",
                        operation_name,
                        retries + 1,
                        e
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Whether a body should be parsed as JSON: declared by content type or
/// starting with an array or object.
pub(crate) fn is_structured(headers: &HeaderMap, body: &[u8]) -> bool {
    let declared = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));
    declared
        || matches!(
            body.iter().find(|b| !b.is_ascii_whitespace()),
            Some(b'[') | Some(b'{')
        )
}

/// Decodes a JSON body into `T`; an empty body decodes as `null`.
pub(crate) fn decode_json<T: DeserializeOwned>(
    headers: &HeaderMap,
    body: &[u8],
) -> Result<T, DecodeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_slice(b"null")?);
    }
    if !is_structured(headers, body) {
        // scalar JSON (numbers, strings) is still accepted
        return serde_json::from_slice(body).map_err(|_| DecodeError::UnexpectedForm {
            expected: "document",
            found: body
                .iter()
                .find(|b| !b.is_ascii_whitespace())
                .map(|b| *b as char)
                .unwrap_or(' '),
        });
    }
    Ok(serde_json::from_slice(body)?)
}

/// Seconds announced in `Retry-After` or `X-RateLimit-Reset`.
fn retry_hint(headers: &HeaderMap) -> Option<Duration> {
    [header::RETRY_AFTER.as_str(), "x-ratelimit-reset"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl ClientInner {
    async fn wait_for_rate_limit(&self) {
        if let (Some(limiter), Some(jitter)) = (&self.rate_limiter, &self.jitter) {
            limiter.until_ready_with_jitter(*jitter).await;
        }
    }

    pub(crate) fn request_line(&self, call: &Call) -> Result<(reqwest::Url, String), ClientError> {
        let url = self.params.url(&call.path)?;
        let line = format!("{} {}", call.method, url);
        Ok((url, line))
    }

    /// Sends `call` until response headers arrive, retrying transient
    /// failures, then maps 429 and other error statuses.
    async fn send(
        &self,
        call: &Call,
        url: &reqwest::Url,
        request: &str,
        accept_json: bool,
        stream: bool,
    ) -> Result<reqwest::Response, ClientError> {
        let header_timeout = self.config.timeouts.response_header();
        let response = with_retry(&self.config.retry, request, || async {
            self.wait_for_rate_limit().await;
            let mut builder = self
                .http
                .request(call.method.clone(), url.clone())
                .headers(call.headers.clone());
            if accept_json && !call.headers.contains_key(header::ACCEPT) {
                builder = builder.header(header::ACCEPT, "application/json");
            }
            if stream {
                builder = builder.header(header::TE, "trailers");
            }
            if let Some(body) = &call.body {
                if call.sends_body() && !call.headers.contains_key(header::CONTENT_TYPE) {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                }
                builder = builder.body(body.clone());
            }
            tracing::debug!("{}", request);
            match tokio::time::timeout(header_timeout, builder.send()).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(source)) => Err(ClientError::Transport {
                    request: request.to_string(),
                    source,
                }),
                Err(_) => Err(ClientError::Timeout {
                    request: request.to_string(),
                    timeout: header_timeout,
                }),
            }
        })
        .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_hint(response.headers()).unwrap_or_else(|| self.config.rate_limit_wait());
            tracing::warn!("{}: rate limited, retry after {:?}", request, wait);
            return Err(ClientError::RateLimited(RateLimitError::new(
                request.to_string(),
                wait,
            )));
        }
        if status.is_client_error() || status.is_server_error() {
            let body = response.bytes().await.map_err(|source| ClientError::Transport {
                request: request.to_string(),
                source,
            })?;
            tracing::debug!("{}: HTTP {}", request, status);
            return Err(ClientError::Http(Box::new(HttpError::new(
                status,
                request.to_string(),
                body,
            ))));
        }
        Ok(response)
    }

    /// Performs `call` and decodes the buffered body with `decode`.
    pub(crate) async fn execute<T, F>(
        &self,
        call: Call,
        decode: F,
    ) -> Result<Response<T>, ClientError>
    where
        F: FnOnce(&HeaderMap, Bytes) -> Result<T, DecodeError>,
    {
        let (url, request) = self.request_line(&call)?;
        let response = self.send(&call, &url, &request, true, false).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|source| ClientError::Transport {
            request: request.clone(),
            source,
        })?;
        tracing::trace!("{}: HTTP {} ({} bytes)", request, status, body.len());
        let value = decode(&headers, body).map_err(|e| ClientError::decode(&request, e))?;
        Ok(Response {
            status,
            headers,
            value,
        })
    }

    /// Performs `call` and copies the body into `sink` as it arrives.
    ///
    /// Trailers sent after the body are merged into the returned headers.
    /// The sink is shut down once the body is complete.
    pub(crate) async fn execute_stream<W>(
        &self,
        call: Call,
        mut sink: W,
    ) -> Result<Response<W>, ClientError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (url, request) = self.request_line(&call)?;
        let response = self.send(&call, &url, &request, false, true).await?;
        let status = response.status();
        let (parts, body) = http::Response::from(response).into_parts();
        let mut headers = parts.headers;
        let mut body = std::pin::pin!(body);
        let mut written: u64 = 0;

        while let Some(frame) = std::future::poll_fn(|cx| body.as_mut().poll_frame(cx)).await {
            let frame = frame.map_err(|source| ClientError::Transport {
                request: request.clone(),
                source,
            })?;
            match frame.into_data() {
                Ok(data) => {
                    sink.write_all(&data).await?;
                    written += data.len() as u64;
                }
                Err(frame) => {
                    if let Ok(trailers) = frame.into_trailers() {
                        for (name, value) in trailers.iter() {
                            headers.append(name.clone(), value.clone());
                        }
                    }
                }
            }
        }
        sink.shutdown().await?;
        tracing::trace!("{}: HTTP {} streamed {} bytes", request, status, written);

        Ok(Response {
            status,
            headers,
            value: sink,
        })
    }
}
