//! RFC 8305 Happy Eyeballs connection establishment.
//!
//! Prefers IPv6 without blocking on it: a short IPv6-only round runs
//! first, then IPv4 gets the remaining budget, then IPv6 again if time
//! is left. Within a round, attempts start 250ms apart and race; the
//! first established stream wins and the rest are aborted.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};

use crate::error::{Error, Result};

/// Delay between successive connection attempts within a round.
pub const CONNECTION_ATTEMPT_DELAY: Duration = Duration::from_millis(250);

/// Budget for the initial IPv6-only round.
pub const RESOLUTION_DELAY: Duration = Duration::from_millis(50);

/// Connect to one of `addrs` within `timeout`.
///
/// `host` is only used for error reporting; resolution happens before
/// this call so the executor can time it separately.
pub async fn connect(host: &str, addrs: &[SocketAddr], timeout: Duration) -> Result<TcpStream> {
    let v6: Vec<SocketAddr> = addrs.iter().copied().filter(|a| a.is_ipv6()).collect();
    let v4: Vec<SocketAddr> = addrs.iter().copied().filter(|a| a.is_ipv4()).collect();

    let start = Instant::now();

    if !v6.is_empty() {
        let budget = RESOLUTION_DELAY.min(CONNECTION_ATTEMPT_DELAY * v6.len() as u32);
        if let Some(stream) = connect_round(&v6, budget).await {
            return Ok(stream);
        }
    }

    let remaining = timeout.saturating_sub(start.elapsed());
    if !v4.is_empty() && !remaining.is_zero() {
        if let Some(stream) = connect_round(&v4, remaining).await {
            return Ok(stream);
        }
    }

    // IPv6 may simply have been slow; give it whatever budget is left
    let remaining = timeout.saturating_sub(start.elapsed());
    if !v6.is_empty() && !remaining.is_zero() {
        if let Some(stream) = connect_round(&v6, remaining).await {
            return Ok(stream);
        }
    }

    Err(Error::Connection(format!(
        "no address of {host} connected within {timeout:?}"
    )))
}

/// Race staggered attempts against every address in the list.
///
/// The first established stream wins; remaining attempts are aborted
/// when the `JoinSet` drops, which closes their sockets.
async fn connect_round(addrs: &[SocketAddr], budget: Duration) -> Option<TcpStream> {
    let deadline = Instant::now() + budget;
    let mut attempts: JoinSet<std::io::Result<TcpStream>> = JoinSet::new();
    let mut pending = addrs.iter().copied();
    let mut next_start = Instant::now();

    loop {
        tokio::select! {
            biased;
            result = attempts.join_next(), if !attempts.is_empty() => {
                match result {
                    Some(Ok(Ok(stream))) => return Some(stream),
                    Some(_) => {
                        if attempts.is_empty() && pending.len() == 0 {
                            return None;
                        }
                    }
                    None => {}
                }
            }
            _ = sleep_until(next_start), if pending.len() != 0 => {
                if let Some(addr) = pending.next() {
                    tracing::trace!("connection attempt to {addr}");
                    attempts.spawn(attempt(addr));
                }
                next_start += CONNECTION_ATTEMPT_DELAY;
            }
            _ = sleep_until(deadline) => return None,
        }
    }
}

/// One TCP connection attempt, with the socket options keep-alive
/// connections rely on.
async fn attempt(addr: SocketAddr) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    SockRef::from(&stream).set_keepalive(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = connect("localhost", &[addr], Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_refused_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect("localhost", &[addr], Duration::from_millis(500)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_falls_back_to_working_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let good = listener.local_addr().unwrap();
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bad = dead.local_addr().unwrap();
        drop(dead);

        let stream = connect("localhost", &[bad, good], Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap(), good);
    }

    #[tokio::test]
    async fn test_no_addresses() {
        let result = connect("nowhere", &[], Duration::from_millis(100)).await;
        assert!(result.is_err());
    }
}
