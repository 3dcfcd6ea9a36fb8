//! # crawl
//!
//! HTTP/1.1 client built around connection reuse: a keep-alive pool
//! keyed by origin, RFC 8305 dual-stack connects, a TTL'd DNS cache,
//! token-bucket rate limiting, transparent decompression, and observable
//! per-request timing. Batches run with bounded parallelism, and large
//! downloads can be split into parallel byte-range segments.

// Core value types
pub mod error;
pub mod headers;
pub mod request;
pub mod response;
pub mod url;

// Subsystems
pub mod dns;
pub mod limiter;
pub mod pool;
pub mod progress;
pub mod stats;

// Transport layer
pub mod transport;

// Request execution
pub mod client;
mod range;

// Re-exports for convenient access
pub use client::{Client, ClientBuilder};
pub use error::{Error, ErrorKind, Result};
pub use headers::Headers;
pub use progress::{NoProgress, ProgressObserver, TransferProgress};
pub use request::Request;
pub use response::Response;
pub use stats::StatsSnapshot;
pub use url::Url;
