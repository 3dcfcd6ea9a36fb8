//! Keep-alive connection pool.
//!
//! `acquire` only ever returns an existing idle connection; creating
//! (and timing) new connections is the caller's job. Entries are
//! liveness-probed with a zero-byte peek before being handed out, so a
//! peer that closed an idle connection costs one probe instead of a
//! failed request. Ownership models the in-use flag: an acquired
//! connection is moved out of the pool, so pooled entries are idle by
//! construction.

use std::collections::HashMap;
use std::io;
use std::mem::MaybeUninit;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use socket2::SockRef;

use crate::transport::MaybeTlsStream;

/// Pool key: connections are strictly segregated by origin and TLS-ness.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl PoolKey {
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }
}

struct IdleConnection {
    stream: MaybeTlsStream,
    last_used: Instant,
}

#[derive(Default)]
struct PoolInner {
    idle: HashMap<PoolKey, Vec<IdleConnection>>,
    /// Total entries across all keys, so release stays O(1).
    count: usize,
}

/// Connection pool shared by all requests of a client.
pub struct ConnectionPool {
    inner: Mutex<PoolInner>,
    max_connections: usize,
    idle_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(max_connections: usize, idle_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            max_connections,
            idle_timeout,
        }
    }

    /// Take an idle, live connection for the key, or `None` when the
    /// caller must establish one. Dead entries found along the way are
    /// closed and discarded.
    pub fn acquire(&self, host: &str, port: u16, tls: bool) -> Option<MaybeTlsStream> {
        let key = PoolKey::new(host, port, tls);
        let mut inner = self.inner.lock().expect("connection pool mutex poisoned");
        let PoolInner { idle, count } = &mut *inner;
        let list = idle.get_mut(&key)?;
        while let Some(entry) = list.pop() {
            *count -= 1;
            if is_alive(entry.stream.tcp()) {
                return Some(entry.stream);
            }
            tracing::debug!("discarding dead pooled connection to {host}:{port}");
            // dropping the entry closes the socket
        }
        None
    }

    /// Return a connection to the pool. At global capacity the
    /// connection is closed instead; the cap is only enforced here, so
    /// reuse keeps working even when the pool is full.
    pub fn release(&self, host: &str, port: u16, stream: MaybeTlsStream) {
        let key = PoolKey::new(host, port, stream.is_tls());
        let mut inner = self.inner.lock().expect("connection pool mutex poisoned");
        if inner.count >= self.max_connections {
            tracing::debug!(
                "pool at capacity ({}), closing connection to {host}:{port}",
                self.max_connections
            );
            return;
        }
        inner.count += 1;
        inner.idle.entry(key).or_default().push(IdleConnection {
            stream,
            last_used: Instant::now(),
        });
    }

    /// Close and remove entries idle for at least the idle timeout.
    pub fn cleanup_idle(&self) {
        let mut inner = self.inner.lock().expect("connection pool mutex poisoned");
        let PoolInner { idle, count } = &mut *inner;
        for list in idle.values_mut() {
            list.retain(|entry| {
                let keep = entry.last_used.elapsed() < self.idle_timeout;
                if !keep {
                    *count -= 1;
                }
                keep
            });
        }
        idle.retain(|_, list| !list.is_empty());
    }

    /// Idle entries currently held, across all keys.
    pub fn idle_count(&self) -> usize {
        self.inner.lock().expect("connection pool mutex poisoned").count
    }
}

/// Zero-byte peek liveness probe: a zero-size read means the peer
/// half-closed, a hard error means dead, and WouldBlock just means the
/// connection is idle and healthy.
fn is_alive(stream: &tokio::net::TcpStream) -> bool {
    let sock = SockRef::from(stream);
    let mut buf = [MaybeUninit::<u8>::uninit()];
    match sock.peek(&mut buf) {
        Ok(0) => false,
        Ok(_) => true,
        Err(err) => matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_key_equality() {
        let key1 = PoolKey::new("example.com", 443, true);
        let key2 = PoolKey::new("example.com", 443, true);
        let key3 = PoolKey::new("example.com", 443, false);
        let key4 = PoolKey::new("example.com", 80, true);

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
        assert_ne!(key1, key4);
    }

    #[test]
    fn test_empty_pool_acquire() {
        let pool = ConnectionPool::new(10, Duration::from_secs(90));
        assert!(pool.acquire("example.com", 80, false).is_none());
        assert_eq!(pool.idle_count(), 0);
    }
}
