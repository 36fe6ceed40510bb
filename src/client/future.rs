use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::error::ClientError;

/// Decoded response of one call.
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub status: StatusCode,
    /// Response headers, with trailers merged in for streamed bodies.
    pub headers: HeaderMap,
    pub value: T,
}

impl<T> Response<T> {
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            status: self.status,
            headers: self.headers,
            value: f(self.value),
        }
    }
}

/// Handle to one in-flight call.
///
/// The call runs on its own task from the moment it is issued. The result
/// is delivered exactly once through [`FutureResult::receive`] or
/// [`FutureResult::wait`]; dropping the handle itself lets the call finish in
/// the background.
pub struct FutureResult<T> {
    request: String,
    handle: JoinHandle<Result<Response<T>, ClientError>>,
}

impl<T: Send + 'static> FutureResult<T> {
    pub(crate) fn spawn<F>(request: String, call: F) -> Self
    where
        F: std::future::Future<Output = Result<Response<T>, ClientError>> + Send + 'static,
    {
        Self {
            request,
            handle: tokio::spawn(call),
        }
    }

    /// `METHOD url` of the call, for logging.
    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Suspends until the call completes or `cancel` fires.
    ///
    /// On cancellation the call task is aborted, closing its connection and
    /// skipping any pending retries.
    pub async fn receive(mut self, cancel: &CancellationToken) -> Result<Response<T>, ClientError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.handle.abort();
                tracing::debug!("{} cancelled by caller", self.request);
                Err(ClientError::Cancelled { request: self.request })
            }
            result = &mut self.handle => join_result(result, self.request),
        }
    }

    /// Suspends until the call completes. Dropping the returned future
    /// before it resolves aborts the call.
    pub async fn wait(self) -> Result<Response<T>, ClientError> {
        let _abort = AbortOnDrop(self.handle.abort_handle());
        join_result(self.handle.await, self.request)
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn join_result<T>(
    result: Result<Result<Response<T>, ClientError>, tokio::task::JoinError>,
    request: String,
) -> Result<Response<T>, ClientError> {
    match result {
        Ok(inner) => inner,
        Err(e) if e.is_cancelled() => Err(ClientError::Cancelled { request }),
        Err(e) => Err(ClientError::Task {
            request,
            message: e.to_string(),
        }),
    }
}

impl<T> std::fmt::Debug for FutureResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FutureResult")
            .field("request", &self.request)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn ok_response(v: u32) -> Result<Response<u32>, ClientError> {
        Ok(Response {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            value: v,
        })
    }

    #[tokio::test]
    async fn test_receive_delivers_result() {
        let call = FutureResult::spawn("GET /a".into(), async { ok_response(7) });
        let response = call.receive(&CancellationToken::new()).await.unwrap();
        assert_eq!(response.value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_cancellation_aborts_call() {
        let call = FutureResult::spawn("GET /slow".into(), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ok_response(1)
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = call.receive(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_wait_aborts_call() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let call = FutureResult::spawn("GET /slow".into(), async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
            ok_response(1)
        });
        let waited = tokio::time::timeout(Duration::from_millis(10), call.wait()).await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_calls_complete_independently() {
        let first = FutureResult::spawn("GET /1".into(), async { ok_response(1) });
        let second = FutureResult::spawn("GET /2".into(), async { ok_response(2) });
        // receive in reverse order of issue
        assert_eq!(second.wait().await.unwrap().value, 2);
        assert_eq!(first.wait().await.unwrap().value, 1);
    }
}
