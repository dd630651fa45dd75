//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;
use webhook_dispatch::config::DispatchConfig;
use webhook_dispatch::queue::{JobRecord, JobState, WebhookQueue};

/// A request as seen by the mock subscriber.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Handle to a running mock backend.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}/hook", self.addr)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Highest number of requests handled at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Start a mock backend on an ephemeral port. `f` receives the zero-based
/// call index and returns `(status, body)`; it may sleep to simulate latency.
pub async fn start_programmable_backend<F, Fut>(f: F) -> MockBackend
where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = MockBackend {
        addr: listener.local_addr().unwrap(),
        requests: Arc::new(Mutex::new(Vec::new())),
        in_flight: Arc::new(AtomicUsize::new(0)),
        peak_in_flight: Arc::new(AtomicUsize::new(0)),
    };
    let f = Arc::new(f);
    let calls = Arc::new(AtomicU32::new(0));

    let state = backend.clone();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            let f = f.clone();
            let calls = calls.clone();
            let state = state.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(socket).await else { return };
                let (request, mut socket) = request;

                let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                state.peak_in_flight.fetch_max(now, Ordering::SeqCst);
                state.requests.lock().unwrap().push(request);

                let index = calls.fetch_add(1, Ordering::SeqCst);
                let (status, body) = f(index).await;
                state.in_flight.fetch_sub(1, Ordering::SeqCst);

                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason(status),
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    backend
}

/// Backend that always answers `status` with `body`.
pub async fn start_mock_backend(status: u16, body: &'static str) -> MockBackend {
    start_programmable_backend(move |_| async move { (status, body.to_string()) }).await
}

async fn read_request(socket: TcpStream) -> Option<(CapturedRequest, TcpStream)> {
    let mut reader = BufReader::new(socket);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await.ok()?;

    Some((
        CapturedRequest {
            method,
            path,
            headers,
            body,
        },
        reader.into_inner(),
    ))
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Defaults with millisecond-scale backoff so retry paths finish quickly.
pub fn fast_config() -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.queue.base_delay_ms = 10;
    config.queue.max_delay_ms = 40;
    config.queue.poll_interval_ms = 5;
    config.queue.drain_timeout_secs = 5;
    config.delivery.timeout_secs = 5;
    config.breaker.timeout_ms = 5_000;
    config.breaker.failure_threshold = 100;
    config
}

/// Poll until the job is completed or failed.
pub async fn wait_for_terminal(queue: &WebhookQueue, id: Uuid) -> JobRecord {
    wait_for_state(queue, id, |state| matches!(state, JobState::Completed | JobState::Failed)).await
}

pub async fn wait_for_state<P>(queue: &WebhookQueue, id: Uuid, predicate: P) -> JobRecord
where
    P: Fn(JobState) -> bool,
{
    for _ in 0..1_000 {
        if let Some(record) = queue.get(id).await.unwrap() {
            if predicate(record.state) {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not reach the expected state");
}
