//! HTTP/1.1 wire format: request encoding, streaming response reads, and
//! response parsing with chunked decoding and transparent decompression.
//!
//! Uses httparse for status-line and header parsing and raw I/O for
//! request formatting.

use std::time::Duration;

use bytes::Bytes;
use http::Method;
use tokio::io::AsyncReadExt;
use tokio::time::{timeout, Instant};

use crate::error::ErrorKind;
use crate::progress::ProgressObserver;
use crate::request::Request;
use crate::response::{self, Encoding, Response, ACCEPT_ENCODING};
use crate::stats::Statistics;
use crate::transport::MaybeTlsStream;

/// Read unit for the streaming reader; large so big downloads stay cheap.
const READ_CHUNK: usize = 128 * 1024;

/// Maximum response header block (64KB).
const MAX_HEADERS_SIZE: usize = 64 * 1024;

/// Maximum number of headers to parse.
const MAX_HEADERS_COUNT: usize = 100;

/// Pause before retrying a transient read error.
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Assemble the on-wire request: request line, Host, every user header
/// verbatim, then defaults for whatever the caller didn't set.
pub fn encode_request(req: &Request, user_agent: &str, compression_enabled: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(512);

    // Request line: METHOD PATH[?QUERY] HTTP/1.1
    out.extend_from_slice(req.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(req.url.request_target().as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    // Host, with the port elided when it matches the scheme default
    out.extend_from_slice(b"Host: ");
    out.extend_from_slice(req.url.host_header().as_bytes());
    out.extend_from_slice(b"\r\n");

    for (name, value) in req.headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    if !req.headers.contains("User-Agent") {
        out.extend_from_slice(b"User-Agent: ");
        out.extend_from_slice(user_agent.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !req.headers.contains("Connection") {
        out.extend_from_slice(b"Connection: keep-alive\r\n");
    }
    if !req.headers.contains("Accept") {
        out.extend_from_slice(b"Accept: */*\r\n");
    }
    if !req.headers.contains("Accept-Encoding") && req.enable_compression && compression_enabled {
        out.extend_from_slice(b"Accept-Encoding: ");
        out.extend_from_slice(ACCEPT_ENCODING.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !req.body.is_empty() && !req.headers.contains("Content-Length") {
        out.extend_from_slice(b"Content-Length: ");
        out.extend_from_slice(req.body.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"\r\n");
    out
}

/// How a streaming read ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Message framing was satisfied (length reached, chunked terminator,
    /// or a HEAD response).
    Complete,
    /// Peer closed the connection in an orderly way.
    Closed,
    /// The inactivity deadline elapsed.
    Inactivity,
    /// Hard transport error, or a size cap was exceeded.
    Error,
}

/// Read a full response off the stream.
///
/// The timeout is an inactivity deadline: every received byte pushes it
/// out by `inactivity_timeout`, so a slow but flowing download is never
/// cut off. Chunked bodies are detected by scanning for the `0\r\n\r\n`
/// terminator; trailer sections after the final chunk are not supported.
pub async fn read_response(
    stream: &mut MaybeTlsStream,
    method: &Method,
    inactivity_timeout: Duration,
    max_response_size: usize,
    stats: &Statistics,
    progress: &dyn ProgressObserver,
) -> (Vec<u8>, ReadOutcome) {
    let mut data = Vec::with_capacity(64 * 1024);
    let mut buf = vec![0u8; READ_CHUNK];
    let mut headers_end: Option<usize> = None;
    let mut content_length: Option<u64> = None;
    let mut chunked = false;
    let mut first_byte_seen = false;
    let request_start = Instant::now();

    loop {
        let n = match timeout(inactivity_timeout, stream.read(&mut buf)).await {
            Err(_) => return (data, ReadOutcome::Inactivity),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::Interrupted => {
                tokio::time::sleep(TRANSIENT_RETRY_DELAY).await;
                continue;
            }
            Ok(Err(err)) => {
                tracing::debug!("response read failed: {err}");
                return (data, ReadOutcome::Error);
            }
            Ok(Ok(0)) => return (data, ReadOutcome::Closed),
            Ok(Ok(n)) => n,
        };

        if !first_byte_seen {
            first_byte_seen = true;
            stats.record_first_byte(request_start.elapsed());
        }
        progress.on_bytes(n as u64);

        if data.len() + n > max_response_size {
            tracing::warn!("response exceeded {max_response_size} bytes, aborting read");
            return (data, ReadOutcome::Error);
        }
        data.extend_from_slice(&buf[..n]);

        if headers_end.is_none() {
            match find_header_end(&data) {
                Some(end) => {
                    let (length, is_chunked) = scan_framing(&data[..end]);
                    headers_end = Some(end);
                    content_length = length;
                    chunked = is_chunked;
                }
                None if data.len() > MAX_HEADERS_SIZE => {
                    tracing::debug!("response header block too large");
                    return (data, ReadOutcome::Error);
                }
                None => {}
            }
        }

        if let Some(end) = headers_end {
            if *method == Method::HEAD {
                return (data, ReadOutcome::Complete);
            }
            if chunked {
                if contains_chunk_terminator(&data[end..]) {
                    return (data, ReadOutcome::Complete);
                }
            } else if let Some(length) = content_length {
                if data.len() as u64 >= end as u64 + length {
                    return (data, ReadOutcome::Complete);
                }
            }
            // no framing information: read until close or inactivity
        }
    }
}

/// Parse a fully buffered response: status line, headers, body (chunked
/// decoded when flagged), then best-effort decompression.
///
/// A decompression failure keeps the raw body and leaves
/// `was_compressed` false; the failure is only recorded in the sink.
pub fn parse_response(data: &[u8], enable_decompression: bool, stats: &Statistics) -> Response {
    let Some(headers_end) = find_header_end(data) else {
        return Response::failure();
    };

    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
    let mut parsed = httparse::Response::new(&mut raw);
    if !matches!(
        parsed.parse(&data[..headers_end]),
        Ok(httparse::Status::Complete(_))
    ) {
        return Response::failure();
    }
    let Some(status_code) = parsed.code else {
        return Response::failure();
    };

    let mut resp = Response {
        status_code,
        status_message: parsed.reason.unwrap_or("").to_string(),
        ..Response::default()
    };
    for header in parsed.headers.iter().filter(|h| !h.name.is_empty()) {
        resp.headers
            .insert(header.name, String::from_utf8_lossy(header.value).into_owned());
    }

    let chunked = resp
        .get_header("Transfer-Encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    let body = if headers_end < data.len() {
        if chunked {
            decode_chunked(&data[headers_end..])
        } else {
            data[headers_end..].to_vec()
        }
    } else {
        Vec::new()
    };

    resp.bytes_received = body.len() as u64;

    if enable_decompression && !body.is_empty() {
        let encoding = resp.get_header("Content-Encoding").and_then(Encoding::detect);
        if let Some(encoding) = encoding {
            match response::decompress(&body, encoding) {
                Some(decoded) => {
                    resp.body = Bytes::from(decoded);
                    resp.was_compressed = true;
                    return resp;
                }
                None => {
                    tracing::debug!("decompression failed, keeping raw body");
                    stats.record_error(ErrorKind::DecompressionFailed);
                }
            }
        }
    }

    resp.body = Bytes::from(body);
    resp
}

/// Find the end of the HTTP header block, returning the index just past
/// the `\r\n\r\n`.
pub(crate) fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|i| i + 4)
}

/// Pull Content-Length and chunked-ness out of a complete header block.
fn scan_framing(header_block: &[u8]) -> (Option<u64>, bool) {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
    let mut parsed = httparse::Response::new(&mut raw);
    if parsed.parse(header_block).is_err() {
        return (None, false);
    }

    let mut content_length = None;
    let mut chunked = false;
    for header in parsed.headers.iter().filter(|h| !h.name.is_empty()) {
        if header.name.eq_ignore_ascii_case("content-length") {
            content_length = Some(leading_digits(&String::from_utf8_lossy(header.value)));
        } else if header.name.eq_ignore_ascii_case("transfer-encoding")
            && String::from_utf8_lossy(header.value)
                .to_ascii_lowercase()
                .contains("chunked")
        {
            chunked = true;
        }
    }
    (content_length, chunked)
}

/// Whether the buffered chunked body already holds the final-chunk
/// pattern. Plain substring match; trailer headers would defeat it.
fn contains_chunk_terminator(body: &[u8]) -> bool {
    body.windows(5).any(|window| window == b"0\r\n\r\n")
}

/// Decimal value of the leading digit run ("123abc" → 123, "abc" → 0).
fn leading_digits(value: &str) -> u64 {
    value
        .trim_start()
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .fold(0u64, |acc, b| {
            acc.saturating_mul(10).saturating_add((b - b'0') as u64)
        })
}

/// Decode a chunked body: hex size line, `size` bytes, CRLF; stops at
/// the zero-length chunk. Trailer headers are not parsed.
fn decode_chunked(data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let Some((size, line_len)) = parse_chunk_size(&data[pos..]) else {
            break;
        };
        if size == 0 {
            break;
        }
        let start = pos + line_len;
        let end = (start + size).min(data.len());
        body.extend_from_slice(&data[start..end]);
        pos = start + size + 2; // skip the payload and its trailing CRLF
    }
    body
}

/// Parse a chunk-size line, returning (size, bytes consumed including
/// the CRLF). Chunk extensions after ';' are ignored.
fn parse_chunk_size(buffer: &[u8]) -> Option<(usize, usize)> {
    let crlf = buffer.windows(2).position(|window| window == b"\r\n")?;
    let line = std::str::from_utf8(&buffer[..crlf]).ok()?;
    let size_part = line.split(';').next()?;
    let size = usize::from_str_radix(size_part.trim(), 16).ok()?;
    Some((size, crlf + 2))
}
