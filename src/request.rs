//! Request value type.

use std::time::Duration;

use bytes::Bytes;
use http::Method;

use crate::headers::Headers;
use crate::url::Url;

/// A single HTTP request.
///
/// Value-typed and cheap to clone; the redirect and retry paths derive
/// new requests from the original. `timeout` is a read-inactivity
/// deadline, not a total-time budget: it resets on every byte received.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub body: Bytes,
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub enable_compression: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub exponential_backoff: bool,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: Bytes::new(),
            timeout: Duration::from_secs(30),
            follow_redirects: false,
            max_redirects: 10,
            enable_compression: true,
            max_retries: 0,
            retry_delay: Duration::from_millis(1000),
            exponential_backoff: true,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }
}
