//! Parallel byte-range downloads.

use std::time::Duration;

use bytes::Bytes;
use http::Method;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::client::Client;
use crate::request::Request;
use crate::response::Response;

/// Timeout for the HEAD probe.
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts per segment before the whole download is abandoned.
const SEGMENT_ATTEMPTS: u32 = 3;

/// Pause between segment retries.
const SEGMENT_RETRY_DELAY: Duration = Duration::from_secs(1);

impl Client {
    /// Download `req` split into `parallel` byte-range segments.
    ///
    /// A HEAD probe decides eligibility: the origin must report a
    /// non-zero `Content-Length` and `Accept-Ranges: bytes`. Returns
    /// `None` when the transfer cannot be segmented or any segment
    /// fails; callers fall back to a plain single-pipe request.
    pub async fn download(&self, req: &Request, parallel: usize) -> Option<Response> {
        if parallel < 2 {
            return None;
        }

        let start = Instant::now();

        let mut head = req.clone();
        head.method = Method::HEAD;
        head.timeout = HEAD_TIMEOUT;
        let probe = self.request(&head).await;

        let content_length: u64 = probe
            .get_header("Content-Length")?
            .trim()
            .parse()
            .ok()?;
        let ranged = probe
            .get_header("Accept-Ranges")
            .map(|v| v.contains("bytes"))
            .unwrap_or(false);
        if content_length == 0 || !ranged {
            return None;
        }

        self.progress_observer().on_total(content_length);
        let segment_size = content_length / parallel as u64;
        tracing::debug!("range download: {parallel} segments of ~{segment_size} bytes");

        let mut tasks = JoinSet::new();
        for index in 0..parallel {
            let client = self.clone();
            let mut segment_req = req.clone();
            let start_byte = index as u64 * segment_size;
            let range = if index == parallel - 1 {
                // open-ended so the last segment covers any remainder
                format!("bytes={start_byte}-")
            } else {
                format!("bytes={start_byte}-{}", (index as u64 + 1) * segment_size - 1)
            };
            segment_req.headers.insert("Range", range);
            tasks.spawn(async move { (index, client.fetch_segment(&segment_req).await) });
        }

        let mut parts: Vec<Option<Bytes>> = (0..parallel).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, body) = joined.ok()?;
            parts[index] = Some(body?);
        }

        let mut body = Vec::with_capacity(content_length as usize);
        for part in parts {
            body.extend_from_slice(&part?);
        }

        let mut response = Response::failure();
        response.status_code = 206;
        response.status_message = "Partial Content".to_string();
        response.bytes_received = body.len() as u64;
        response.body = Bytes::from(body);
        response.elapsed_time = start.elapsed();
        Some(response)
    }

    /// One segment with its retry loop: up to three attempts, a second
    /// apart, until the origin answers 206.
    async fn fetch_segment(&self, req: &Request) -> Option<Bytes> {
        let mut attempts = 0;
        loop {
            if attempts > 0 {
                tokio::time::sleep(SEGMENT_RETRY_DELAY).await;
            }
            let resp = self.request(req).await;
            attempts += 1;
            if resp.status_code == 206 {
                return Some(resp.body);
            }
            if attempts >= SEGMENT_ATTEMPTS {
                tracing::debug!(
                    "segment {:?} failed after {attempts} attempts (status {})",
                    req.headers.get("Range"),
                    resp.status_code
                );
                return None;
            }
        }
    }
}
