//! Error types for the crawl crate.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while establishing connections or speaking HTTP.
///
/// The public request path never surfaces these directly: transport
/// failures come back as a `Response` with `status_code` 0 and the
/// matching [`ErrorKind`] recorded in the statistics sink.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// URL parse failure. No request is issued for these.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// DNS resolution produced no usable addresses.
    #[error("DNS resolution failed for {0}")]
    Dns(String),

    /// No socket connected within the timeout.
    #[error("connection failed: {0}")]
    Connection(String),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A write to the peer failed.
    #[error("send failed: {0}")]
    Send(String),

    /// HTTP protocol error.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }
}

/// Failure classification recorded in the statistics sink.
///
/// `Retry` and `MaxRetriesExceeded` are produced only by the retry
/// wrapper; `DecompressionFailed` is non-fatal (the raw body is kept).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidUrl,
    DnsFailure,
    ConnectionFailed,
    TlsHandshakeFailed,
    SendFailed,
    ReadTimeout,
    ReadError,
    Retry,
    MaxRetriesExceeded,
    DecompressionFailed,
}

impl ErrorKind {
    /// Key under which this kind is counted in the statistics sink.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::DnsFailure => "dns_failure",
            ErrorKind::ConnectionFailed => "connection_failed",
            ErrorKind::TlsHandshakeFailed => "tls_handshake_failed",
            ErrorKind::SendFailed => "send_failed",
            ErrorKind::ReadTimeout => "read_timeout",
            ErrorKind::ReadError => "read_error",
            ErrorKind::Retry => "retry",
            ErrorKind::MaxRetriesExceeded => "max_retries_exceeded",
            ErrorKind::DecompressionFailed => "decompression_failed",
        }
    }
}
