//! Scriptable loopback HTTP/1.1 server for integration tests.
//!
//! The responder closure produces the raw response bytes for each
//! request; connections are kept open (keep-alive) until the client
//! closes them or the response carries `Connection: close`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Minimal view of a received request handed to the responder.
pub struct ReceivedRequest {
    /// 1-based, counted across all connections.
    pub request_count: usize,
    /// Request line plus headers, up to the blank line.
    pub head: String,
}

#[allow(dead_code)]
impl ReceivedRequest {
    pub fn method(&self) -> &str {
        self.head.split_whitespace().next().unwrap_or("")
    }

    pub fn path(&self) -> &str {
        self.head.split_whitespace().nth(1).unwrap_or("/")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }
}

/// A canned response plus an optional artificial service delay.
pub struct MockResponse {
    pub bytes: Vec<u8>,
    pub delay: Duration,
}

impl MockResponse {
    #[allow(dead_code)]
    pub fn delayed(bytes: Vec<u8>, delay: Duration) -> Self {
        Self { bytes, delay }
    }
}

impl From<Vec<u8>> for MockResponse {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            delay: Duration::ZERO,
        }
    }
}

type Responder = Arc<dyn Fn(&ReceivedRequest) -> MockResponse + Send + Sync>;

pub struct MockServer {
    port: u16,
    requests: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
    max_concurrent: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockServer {
    /// Start a server whose `respond` closure produces the raw bytes for
    /// each request.
    pub async fn start<F>(respond: F) -> std::io::Result<Self>
    where
        F: Fn(&ReceivedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let requests = Arc::new(AtomicUsize::new(0));
        let connections = Arc::new(AtomicUsize::new(0));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));
        let responder: Responder = Arc::new(respond);

        {
            let requests = requests.clone();
            let connections = connections.clone();
            let concurrent = concurrent.clone();
            let max_concurrent = max_concurrent.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    let responder = responder.clone();
                    let requests = requests.clone();
                    let concurrent = concurrent.clone();
                    let max_concurrent = max_concurrent.clone();
                    tokio::spawn(async move {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        max_concurrent.fetch_max(now, Ordering::SeqCst);
                        handle_connection(stream, responder, requests).await;
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            });
        }

        Ok(Self {
            port,
            requests,
            connections,
            max_concurrent,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Requests served so far, across all connections.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// TCP connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// High-water mark of simultaneously open connections.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

async fn handle_connection(mut stream: TcpStream, respond: Responder, requests: Arc<AtomicUsize>) {
    let mut buf = vec![0u8; 16 * 1024];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        // wait for a complete request head
        let head_end = loop {
            if let Some(pos) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            match timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => pending.extend_from_slice(&buf[..n]),
                _ => return,
            }
        };

        let head = String::from_utf8_lossy(&pending[..head_end]).into_owned();

        // drain any body named by Content-Length to keep framing intact
        let content_length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        while pending.len() < head_end + content_length {
            match timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => pending.extend_from_slice(&buf[..n]),
                _ => return,
            }
        }
        pending.drain(..head_end + content_length);

        let count = requests.fetch_add(1, Ordering::SeqCst) + 1;
        let request = ReceivedRequest {
            request_count: count,
            head,
        };
        let response = respond(&request);
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }

        let close = says_close(&response.bytes);
        if stream.write_all(&response.bytes).await.is_err() {
            return;
        }
        let _ = stream.flush().await;
        if close {
            return;
        }
    }
}

/// Whether the response head asks for the connection to be closed.
fn says_close(response: &[u8]) -> bool {
    let end = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
        .unwrap_or(response.len());
    String::from_utf8_lossy(&response[..end])
        .to_ascii_lowercase()
        .contains("connection: close")
}

/// Canned 200 with Content-Length framing.
#[allow(dead_code)]
pub fn ok_body(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

/// Canned response with an arbitrary status line and body.
#[allow(dead_code)]
pub fn status_body(status: u16, reason: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}
