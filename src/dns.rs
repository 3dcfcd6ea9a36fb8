//! DNS cache with TTL expiry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::net::lookup_host;

/// Default TTL for cached resolutions.
pub const DEFAULT_DNS_TTL: Duration = Duration::from_secs(300);

/// Cached resolver. Keys are `"host:port"`; entries are served while
/// younger than their TTL and evicted lazily on access (or eagerly via
/// [`DnsCache::cleanup`]). Failed resolutions are never cached.
pub struct DnsCache {
    default_ttl: Duration,
    cache: Mutex<HashMap<String, CachedAddrs>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct CachedAddrs {
    addrs: Vec<SocketAddr>,
    resolved_at: Instant,
    ttl: Duration,
}

/// Cache counters, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl DnsCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            cache: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Resolve through the cache. An empty vector means resolution
    /// failed; callers treat that as a DNS failure.
    pub async fn resolve(&self, host: &str, port: u16) -> Vec<SocketAddr> {
        let key = format!("{host}:{port}");

        {
            let mut cache = self.cache.lock().expect("DNS cache mutex poisoned");
            if let Some(entry) = cache.get(&key) {
                if entry.resolved_at.elapsed() < entry.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return entry.addrs.clone();
                }
                cache.remove(&key);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        // resolve outside the lock, commit after
        let addrs = resolve_host(host, port).await;
        if !addrs.is_empty() {
            self.cache.lock().expect("DNS cache mutex poisoned").insert(
                key,
                CachedAddrs {
                    addrs: addrs.clone(),
                    resolved_at: Instant::now(),
                    ttl: self.default_ttl,
                },
            );
        }
        addrs
    }

    /// Resolve and discard, to pre-populate the cache.
    pub async fn warmup(&self, host: &str, port: u16) {
        let _ = self.resolve(host, port).await;
    }

    /// Drop all expired entries.
    pub fn cleanup(&self) {
        let mut cache = self.cache.lock().expect("DNS cache mutex poisoned");
        cache.retain(|_, entry| entry.resolved_at.elapsed() < entry.ttl);
    }

    pub fn clear(&self) {
        self.cache.lock().expect("DNS cache mutex poisoned").clear();
    }

    pub fn stats(&self) -> DnsCacheStats {
        DnsCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.lock().expect("DNS cache mutex poisoned").len(),
        }
    }
}

/// One-shot resolution without caching.
pub async fn resolve_host(host: &str, port: u16) -> Vec<SocketAddr> {
    match lookup_host((host, port)).await {
        Ok(addrs) => addrs.collect(),
        Err(err) => {
            tracing::debug!("DNS resolution for {host}:{port} failed: {err}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hit_after_miss() {
        let cache = DnsCache::new(DEFAULT_DNS_TTL);

        let first = cache.resolve("localhost", 80).await;
        assert!(!first.is_empty());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.entries, 1);

        let second = cache.resolve("localhost", 80).await;
        assert_eq!(first, second);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_ports_are_distinct_keys() {
        let cache = DnsCache::new(DEFAULT_DNS_TTL);
        cache.resolve("localhost", 80).await;
        cache.resolve("localhost", 443).await;
        assert_eq!(cache.stats().entries, 2);
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted() {
        let cache = DnsCache::new(Duration::ZERO);
        cache.resolve("localhost", 80).await;
        // TTL zero: the entry is already stale on the next access
        cache.resolve("localhost", 80).await;
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_expired() {
        let cache = DnsCache::new(Duration::ZERO);
        cache.resolve("localhost", 80).await;
        cache.cleanup();
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_failed_resolution_not_cached() {
        let cache = DnsCache::new(DEFAULT_DNS_TTL);
        let addrs = cache.resolve("host.invalid", 80).await;
        assert!(addrs.is_empty());
        assert_eq!(cache.stats().entries, 0);
    }
}
