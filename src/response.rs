//! HTTP response handling with transparent decompression.

use std::io::Read;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::headers::Headers;

/// Value advertised in `Accept-Encoding` when compression is enabled.
pub const ACCEPT_ENCODING: &str = "br, gzip, deflate";

/// Content encodings the client can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Deflate,
    Brotli,
}

impl Encoding {
    /// Detect the encoding from a `Content-Encoding` header value.
    /// First match wins: br, then gzip, then deflate.
    pub fn detect(content_encoding: &str) -> Option<Self> {
        let lower = content_encoding.to_ascii_lowercase();
        if lower.contains("br") {
            Some(Self::Brotli)
        } else if lower.contains("gzip") {
            Some(Self::Gzip)
        } else if lower.contains("deflate") {
            Some(Self::Deflate)
        } else {
            None
        }
    }
}

/// A completed HTTP response.
///
/// `status_code` 0 means the transport failed before a parseable
/// response arrived. `bytes_received` counts body bytes as they came off
/// the wire (after chunked decoding, before decompression), so it can
/// differ from `body.len()` when the body was compressed.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status_code: u16,
    pub status_message: String,
    pub headers: Headers,
    pub body: Bytes,
    pub elapsed_time: Duration,
    pub bytes_received: u64,
    pub was_compressed: bool,
    pub redirect_count: u32,
}

impl Response {
    /// Transport-failure response (status 0, everything else empty).
    pub fn failure() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status_code)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code)
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get_header("Content-Type")
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.get_header("Content-Encoding")
    }

    /// Body as text, lossily converted.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::HttpProtocol(format!("JSON decode failed: {e}")))
    }
}

/// Decompress `data` with the given codec. `None` on any decoder error;
/// callers keep the raw body in that case.
pub(crate) fn decompress(data: &[u8], encoding: Encoding) -> Option<Vec<u8>> {
    match encoding {
        Encoding::Gzip => decode_gzip(data),
        Encoding::Deflate => decode_deflate(data),
        Encoding::Brotli => decode_brotli(data),
    }
}

fn decode_gzip(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoded = Vec::new();
    flate2::read::GzDecoder::new(data)
        .read_to_end(&mut decoded)
        .ok()?;
    Some(decoded)
}

fn decode_deflate(data: &[u8]) -> Option<Vec<u8>> {
    // servers disagree on whether "deflate" means zlib-wrapped or raw
    let mut decoded = Vec::new();
    if flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut decoded)
        .is_ok()
    {
        return Some(decoded);
    }
    decoded.clear();
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(&mut decoded)
        .ok()?;
    Some(decoded)
}

fn decode_brotli(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoded = Vec::new();
    brotli::Decompressor::new(data, 4096)
        .read_to_end(&mut decoded)
        .ok()?;
    Some(decoded)
}
