//! Thread-safe request statistics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::ErrorKind;

/// Statistics sink shared by every request of a client.
///
/// Counters are plain atomics so the hot path never blocks; only the
/// error-kind map and the current-endpoint strings take a lock.
#[derive(Debug)]
pub struct Statistics {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,

    connections_created: AtomicU64,
    connections_reused: AtomicU64,

    dns_lookups: AtomicU64,
    dns_cache_hits: AtomicU64,

    latency_sum_ms: AtomicU64,
    latency_min_ms: AtomicU64,
    latency_max_ms: AtomicU64,

    dns_ms_sum: AtomicU64,
    tcp_ms_sum: AtomicU64,
    tcp_count: AtomicU64,
    first_byte_ms_sum: AtomicU64,
    first_byte_count: AtomicU64,

    errors: Mutex<HashMap<&'static str, u64>>,
    endpoint: Mutex<Endpoint>,
}

#[derive(Debug, Default, Clone)]
struct Endpoint {
    ip: String,
    host: String,
    secure: bool,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            connections_created: AtomicU64::new(0),
            connections_reused: AtomicU64::new(0),
            dns_lookups: AtomicU64::new(0),
            dns_cache_hits: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_min_ms: AtomicU64::new(u64::MAX),
            latency_max_ms: AtomicU64::new(0),
            dns_ms_sum: AtomicU64::new(0),
            tcp_ms_sum: AtomicU64::new(0),
            tcp_count: AtomicU64::new(0),
            first_byte_ms_sum: AtomicU64::new(0),
            first_byte_count: AtomicU64::new(0),
            errors: Mutex::new(HashMap::new()),
            endpoint: Mutex::new(Endpoint::default()),
        }
    }

    pub fn record_request(&self, latency: Duration, bytes_received: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes_received, Ordering::Relaxed);

        let ms = latency.as_millis() as u64;
        self.latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_min_ms.fetch_min(ms, Ordering::Relaxed);
        self.latency_max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn record_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_connection(&self, reused: bool) {
        if reused {
            self.connections_reused.fetch_add(1, Ordering::Relaxed);
        } else {
            self.connections_created.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self, kind: ErrorKind) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        let mut errors = self.errors.lock().expect("error counts mutex poisoned");
        *errors.entry(kind.as_str()).or_insert(0) += 1;
    }

    pub fn record_dns_lookup(&self, duration: Duration, cached: bool) {
        self.dns_lookups.fetch_add(1, Ordering::Relaxed);
        if cached {
            self.dns_cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.dns_ms_sum
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_tcp_handshake(&self, duration: Duration) {
        self.tcp_count.fetch_add(1, Ordering::Relaxed);
        self.tcp_ms_sum
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_first_byte(&self, duration: Duration) {
        self.first_byte_count.fetch_add(1, Ordering::Relaxed);
        self.first_byte_ms_sum
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_endpoint(&self, ip: &str, host: &str, secure: bool) {
        let mut endpoint = self.endpoint.lock().expect("endpoint mutex poisoned");
        endpoint.ip = ip.to_string();
        endpoint.host = host.to_string();
        endpoint.secure = secure;
    }

    /// Point-in-time view of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let min = self.latency_min_ms.load(Ordering::Relaxed);
        let endpoint = self.endpoint.lock().expect("endpoint mutex poisoned").clone();
        let error_counts = self.errors.lock().expect("error counts mutex poisoned").clone();

        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_reused: self.connections_reused.load(Ordering::Relaxed),
            dns_lookups: self.dns_lookups.load(Ordering::Relaxed),
            dns_cache_hits: self.dns_cache_hits.load(Ordering::Relaxed),
            latency_sum_ms: self.latency_sum_ms.load(Ordering::Relaxed),
            latency_min_ms: if min == u64::MAX { 0 } else { min },
            latency_max_ms: self.latency_max_ms.load(Ordering::Relaxed),
            latency_count: self.total_requests.load(Ordering::Relaxed),
            dns_ms_sum: self.dns_ms_sum.load(Ordering::Relaxed),
            tcp_ms_sum: self.tcp_ms_sum.load(Ordering::Relaxed),
            tcp_count: self.tcp_count.load(Ordering::Relaxed),
            first_byte_ms_sum: self.first_byte_ms_sum.load(Ordering::Relaxed),
            first_byte_count: self.first_byte_count.load(Ordering::Relaxed),
            error_counts,
            current_ip: endpoint.ip,
            current_host: endpoint.host,
            is_secure: endpoint.secure,
        }
    }

    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.total_errors.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.connections_created.store(0, Ordering::Relaxed);
        self.connections_reused.store(0, Ordering::Relaxed);
        self.dns_lookups.store(0, Ordering::Relaxed);
        self.dns_cache_hits.store(0, Ordering::Relaxed);
        self.latency_sum_ms.store(0, Ordering::Relaxed);
        self.latency_min_ms.store(u64::MAX, Ordering::Relaxed);
        self.latency_max_ms.store(0, Ordering::Relaxed);
        self.dns_ms_sum.store(0, Ordering::Relaxed);
        self.tcp_ms_sum.store(0, Ordering::Relaxed);
        self.tcp_count.store(0, Ordering::Relaxed);
        self.first_byte_ms_sum.store(0, Ordering::Relaxed);
        self.first_byte_count.store(0, Ordering::Relaxed);
        self.errors.lock().expect("error counts mutex poisoned").clear();
        *self.endpoint.lock().expect("endpoint mutex poisoned") = Endpoint::default();
    }
}

/// Snapshot of the statistics sink, with averages derived on demand.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub connections_created: u64,
    pub connections_reused: u64,
    pub dns_lookups: u64,
    pub dns_cache_hits: u64,
    pub latency_sum_ms: u64,
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
    pub latency_count: u64,
    pub dns_ms_sum: u64,
    pub tcp_ms_sum: u64,
    pub tcp_count: u64,
    pub first_byte_ms_sum: u64,
    pub first_byte_count: u64,
    pub error_counts: HashMap<&'static str, u64>,
    pub current_ip: String,
    pub current_host: String,
    pub is_secure: bool,
}

impl StatsSnapshot {
    pub fn avg_latency_ms(&self) -> f64 {
        avg(self.latency_sum_ms, self.latency_count)
    }

    pub fn avg_dns_ms(&self) -> f64 {
        avg(self.dns_ms_sum, self.dns_lookups)
    }

    pub fn avg_tcp_ms(&self) -> f64 {
        avg(self.tcp_ms_sum, self.tcp_count)
    }

    pub fn avg_first_byte_ms(&self) -> f64 {
        avg(self.first_byte_ms_sum, self.first_byte_count)
    }

    /// Fraction of connections that were reused, in [0, 1].
    pub fn reuse_rate(&self) -> f64 {
        let total = self.connections_created + self.connections_reused;
        if total == 0 {
            0.0
        } else {
            self.connections_reused as f64 / total as f64
        }
    }
}

fn avg(sum: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_min_max_avg() {
        let stats = Statistics::new();
        stats.record_request(Duration::from_millis(10), 100);
        stats.record_request(Duration::from_millis(30), 200);

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.bytes_received, 300);
        assert_eq!(snap.latency_min_ms, 10);
        assert_eq!(snap.latency_max_ms, 30);
        assert_eq!(snap.latency_sum_ms, 40);
        assert_eq!(snap.avg_latency_ms(), 20.0);
    }

    #[test]
    fn test_min_is_zero_without_samples() {
        let stats = Statistics::new();
        assert_eq!(stats.snapshot().latency_min_ms, 0);
    }

    #[test]
    fn test_error_counts() {
        let stats = Statistics::new();
        stats.record_error(ErrorKind::Retry);
        stats.record_error(ErrorKind::Retry);
        stats.record_error(ErrorKind::MaxRetriesExceeded);

        let snap = stats.snapshot();
        assert_eq!(snap.total_errors, 3);
        assert_eq!(snap.error_counts.get("retry"), Some(&2));
        assert_eq!(snap.error_counts.get("max_retries_exceeded"), Some(&1));
    }

    #[test]
    fn test_connection_and_dns_counters() {
        let stats = Statistics::new();
        stats.record_connection(false);
        stats.record_connection(true);
        stats.record_connection(true);
        stats.record_dns_lookup(Duration::from_millis(4), false);
        stats.record_dns_lookup(Duration::ZERO, true);

        let snap = stats.snapshot();
        assert_eq!(snap.connections_created, 1);
        assert_eq!(snap.connections_reused, 2);
        assert!((snap.reuse_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(snap.dns_lookups, 2);
        assert_eq!(snap.dns_cache_hits, 1);
        assert_eq!(snap.avg_dns_ms(), 2.0);
    }

    #[test]
    fn test_reset() {
        let stats = Statistics::new();
        stats.record_request(Duration::from_millis(5), 10);
        stats.record_error(ErrorKind::ReadError);
        stats.set_endpoint("127.0.0.1", "localhost", true);
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.total_errors, 0);
        assert_eq!(snap.latency_min_ms, 0);
        assert!(snap.error_counts.is_empty());
        assert!(snap.current_ip.is_empty());
        assert!(!snap.is_secure);
    }
}
