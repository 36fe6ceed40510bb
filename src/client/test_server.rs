//! Minimal scripted HTTP/1.1 server for transport tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;

/// Routes library logs to the test output; `RUST_LOG` selects the level.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
pub(crate) struct StubResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    delay: Option<Duration>,
}

impl StubResponse {
    pub(crate) fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
            delay: None,
        }
    }

    pub(crate) fn json(status: u16, body: &str) -> Self {
        Self::new(status, body).with_header("Content-Type", "application/json")
    }

    pub(crate) fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Default)]
struct Recorded {
    request_lines: Vec<String>,
    headers: Vec<Vec<String>>,
    bodies: Vec<String>,
}

/// Serves the scripted responses in order, one per connection; the last
/// one repeats.
pub(crate) struct StubServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Recorded>>,
}

impl StubServer {
    pub(crate) async fn start(responses: Vec<StubResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let responses = Arc::new(responses);

        let server_hits = Arc::clone(&hits);
        let server_recorded = Arc::clone(&recorded);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let hits = Arc::clone(&server_hits);
                let recorded = Arc::clone(&server_recorded);
                let responses = Arc::clone(&responses);
                tokio::spawn(async move {
                    serve(stream, &hits, &recorded, &responses).await;
                });
            }
        });

        Self {
            addr,
            hits,
            recorded,
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Request lines (`GET /path?query HTTP/1.1`) in arrival order.
    pub(crate) fn requests(&self) -> Vec<String> {
        self.recorded.lock().unwrap().request_lines.clone()
    }

    /// Headers of request `idx` as lowercase `name: value` lines.
    pub(crate) fn headers(&self, idx: usize) -> Vec<String> {
        self.recorded.lock().unwrap().headers[idx].clone()
    }

    pub(crate) fn bodies(&self) -> Vec<String> {
        self.recorded.lock().unwrap().bodies.clone()
    }
}

async fn serve(
    mut stream: TcpStream,
    hits: &AtomicUsize,
    recorded: &Mutex<Recorded>,
    responses: &[StubResponse],
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<String> = lines
        .map(|l| match l.split_once(':') {
            Some((name, value)) => format!("{}: {}", name.to_ascii_lowercase(), value.trim()),
            None => l.to_ascii_lowercase(),
        })
        .collect();
    let content_length = headers
        .iter()
        .find_map(|h| h.strip_prefix("content-length: "))
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
        }
    }

    let idx = hits.fetch_add(1, Ordering::SeqCst);
    {
        let mut rec = recorded.lock().unwrap();
        rec.request_lines.push(request_line);
        rec.headers.push(headers);
        rec.bodies.push(String::from_utf8_lossy(&body).to_string());
    }
    let Some(response) = responses.get(idx.min(responses.len().saturating_sub(1))) else {
        return;
    };
    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }

    let reason = http::StatusCode::from_u16(response.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        reason,
        response.body.len()
    );
    for (name, value) in &response.headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("\r\n");
    out.push_str(&response.body);
    let _ = stream.write_all(out.as_bytes()).await;
    let _ = stream.shutdown().await;
}
