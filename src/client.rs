//! The client: per-request execution pipeline, retries, redirects, and
//! batch scheduling over shared pool/DNS/limiter/statistics state.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::dns::{self, DnsCache, DnsCacheStats};
use crate::error::{ErrorKind, Result};
use crate::limiter::RateLimiter;
use crate::pool::ConnectionPool;
use crate::progress::{NoProgress, ProgressObserver};
use crate::request::Request;
use crate::response::Response;
use crate::stats::{Statistics, StatsSnapshot};
use crate::transport::connector;
use crate::transport::h1::{self, ReadOutcome};
use crate::transport::tls::TlsClient;
use crate::transport::MaybeTlsStream;
use crate::url::Url;

/// Budget for establishing a new connection (all connect rounds).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_USER_AGENT: &str = concat!("crawl/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
struct Config {
    user_agent: String,
    default_timeout: Duration,
    enable_compression: bool,
}

struct ClientState {
    pool: ConnectionPool,
    dns: Mutex<Option<Arc<DnsCache>>>,
    limiter: RateLimiter,
    tls: TlsClient,
    stats: Statistics,
    config: Mutex<Config>,
    progress: Arc<dyn ProgressObserver>,
    max_response_size: usize,
}

/// HTTP client.
///
/// Cloning is cheap; clones share the connection pool, DNS cache, rate
/// limiter, and statistics, so parallel work through clones still reuses
/// connections correctly.
#[derive(Clone)]
pub struct Client {
    state: Arc<ClientState>,
}

/// Builder for creating HTTP clients.
pub struct ClientBuilder {
    user_agent: String,
    timeout: Duration,
    max_connections: usize,
    idle_timeout: Duration,
    rate_limit: Option<(f64, usize)>,
    dns_cache_ttl: Option<Duration>,
    enable_compression: bool,
    max_response_size: usize,
    progress: Arc<dyn ProgressObserver>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            max_connections: 200,
            idle_timeout: Duration::from_secs(90),
            rate_limit: None,
            dns_cache_ttl: None,
            enable_compression: true,
            max_response_size: 1024 * 1024 * 1024,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Default read-inactivity timeout for the `get`/`post` conveniences.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Global cap on pooled idle connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// How long an idle pooled connection survives `cleanup`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Token-bucket rate limit; burst 0 defaults to the rate.
    pub fn rate_limit(mut self, rate: f64, burst: usize) -> Self {
        self.rate_limit = Some((rate, burst));
        self
    }

    /// Enable the DNS cache with the given TTL.
    pub fn dns_cache(mut self, ttl: Duration) -> Self {
        self.dns_cache_ttl = Some(ttl);
        self
    }

    /// Master switch for Accept-Encoding and decompression.
    pub fn compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    /// Upper bound on a buffered response (guards against servers that
    /// stream forever).
    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    /// Observer notified of transfer progress.
    pub fn progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = observer;
        self
    }

    pub fn build(self) -> Result<Client> {
        let limiter = match self.rate_limit {
            Some((rate, burst)) => RateLimiter::new(rate, burst),
            None => RateLimiter::disabled(),
        };
        Ok(Client {
            state: Arc::new(ClientState {
                pool: ConnectionPool::new(self.max_connections, self.idle_timeout),
                dns: Mutex::new(self.dns_cache_ttl.map(|ttl| Arc::new(DnsCache::new(ttl)))),
                limiter,
                tls: TlsClient::new()?,
                stats: Statistics::new(),
                config: Mutex::new(Config {
                    user_agent: self.user_agent,
                    default_timeout: self.timeout,
                    enable_compression: self.enable_compression,
                }),
                progress: self.progress,
                max_response_size: self.max_response_size,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Client with default settings.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// GET a URL. Transport failures come back as a status-0 response.
    pub async fn get(&self, url: &str) -> Response {
        match Url::parse(url) {
            Ok(parsed) => {
                let mut req = Request::new(Method::GET, parsed);
                req.timeout = self.config().default_timeout;
                self.request(&req).await
            }
            Err(_) => {
                self.state.stats.record_error(ErrorKind::InvalidUrl);
                Response::failure()
            }
        }
    }

    /// POST a body as application/octet-stream.
    pub async fn post(&self, url: &str, body: impl Into<Bytes>) -> Response {
        match Url::parse(url) {
            Ok(parsed) => {
                let mut req = Request::new(Method::POST, parsed);
                req.timeout = self.config().default_timeout;
                req.body = body.into();
                req.headers.insert("Content-Type", "application/octet-stream");
                self.request(&req).await
            }
            Err(_) => {
                self.state.stats.record_error(ErrorKind::InvalidUrl);
                Response::failure()
            }
        }
    }

    /// Execute a request, applying the retry policy when configured.
    pub async fn request(&self, req: &Request) -> Response {
        if req.max_retries > 0 {
            self.execute_with_retry(req).await
        } else {
            self.execute(req).await
        }
    }

    /// Run many requests with at most `max_parallel` in flight at once.
    /// `results[i]` always corresponds to `requests[i]`.
    pub async fn batch(&self, requests: Vec<Request>, max_parallel: usize) -> Vec<Response> {
        let total = requests.len();
        let window = Arc::new(Semaphore::new(max_parallel.max(1)));
        let mut tasks = JoinSet::new();

        for (index, req) in requests.into_iter().enumerate() {
            // sliding window: wait for a slot before dispatching the next
            let permit = window
                .clone()
                .acquire_owned()
                .await
                .expect("batch semaphore closed");
            let client = self.clone();
            tasks.spawn(async move {
                let response = client.request(&req).await;
                drop(permit);
                (index, response)
            });
        }

        let mut responses: Vec<Response> = (0..total).map(|_| Response::failure()).collect();
        while let Some(joined) = tasks.join_next().await {
            if let Ok((index, response)) = joined {
                responses[index] = response;
            }
        }
        responses
    }

    async fn execute_with_retry(&self, req: &Request) -> Response {
        let max_attempts = req.max_retries + 1;
        let mut attempts = 0;

        while attempts < max_attempts {
            let resp = self.execute(req).await;

            // only transport failures (status 0) and 5xx are retryable
            if resp.status_code > 0 && resp.status_code < 500 {
                return resp;
            }

            attempts += 1;
            if attempts < max_attempts {
                let delay = if req.exponential_backoff {
                    req.retry_delay * (1u32 << (attempts - 1).min(20))
                } else {
                    req.retry_delay
                };
                tokio::time::sleep(delay).await;
                self.state.stats.record_error(ErrorKind::Retry);
            }
        }

        self.state.stats.record_error(ErrorKind::MaxRetriesExceeded);
        Response::failure()
    }

    /// One request→response cycle: rate gate, pool acquire or dial,
    /// send, stream-read, parse, release, stats, then redirects.
    async fn execute(&self, req: &Request) -> Response {
        let start = Instant::now();
        let state = &self.state;

        state.limiter.acquire().await;

        let tls = req.url.is_https();
        let host = req.url.host.as_str();
        let port = req.url.port;

        let mut stream = match state.pool.acquire(host, port, tls) {
            Some(stream) => {
                // reuse: resolution and handshake were paid for earlier
                state.stats.record_dns_lookup(Duration::ZERO, true);
                state.stats.record_tcp_handshake(Duration::ZERO);
                state.stats.record_connection(true);
                stream
            }
            None => match self.open_connection(host, port, tls, start).await {
                Ok(stream) => stream,
                Err(resp) => return resp,
            },
        };

        let config = self.config();
        let head = h1::encode_request(req, &config.user_agent, config.enable_compression);

        if let Err(err) = stream.write_all(&head).await {
            tracing::debug!("request write to {host}:{port} failed: {err}");
            state.stats.record_error(ErrorKind::SendFailed);
            return self.failure_response(start);
        }
        if !req.body.is_empty() {
            if let Err(err) = stream.write_all(&req.body).await {
                tracing::debug!("body write to {host}:{port} failed: {err}");
                state.stats.record_error(ErrorKind::SendFailed);
                return self.failure_response(start);
            }
        }
        if stream.flush().await.is_err() {
            state.stats.record_error(ErrorKind::SendFailed);
            return self.failure_response(start);
        }
        state
            .stats
            .record_bytes_sent((head.len() + req.body.len()) as u64);

        let (data, outcome) = h1::read_response(
            &mut stream,
            &req.method,
            req.timeout,
            state.max_response_size,
            &state.stats,
            state.progress.as_ref(),
        )
        .await;

        let mut resp = h1::parse_response(&data, req.enable_compression, &state.stats);
        resp.elapsed_time = start.elapsed();

        // released even after a bad read: the acquire-side liveness probe
        // reaps it if the connection is actually dead
        state.pool.release(host, port, stream);

        state.stats.record_request(resp.elapsed_time, resp.bytes_received);
        if resp.status_code == 0 {
            state.stats.record_error(match outcome {
                ReadOutcome::Inactivity => ErrorKind::ReadTimeout,
                _ => ErrorKind::ReadError,
            });
        }

        if req.follow_redirects && resp.is_redirect() && req.max_redirects > 0 {
            if let Some(location) = resp.get_header("Location") {
                if let Ok(next_url) = Url::parse(location) {
                    tracing::debug!("following {} redirect to {next_url}", resp.status_code);
                    let mut next = req.clone();
                    next.url = next_url;
                    next.max_redirects = req.max_redirects - 1;
                    let mut chained = Box::pin(self.execute(&next)).await;
                    chained.redirect_count += 1;
                    return chained;
                }
            }
        }

        resp
    }

    /// Establish a fresh connection with per-stage timing. On failure
    /// the caller gets the status-0 response to hand back.
    async fn open_connection(
        &self,
        host: &str,
        port: u16,
        tls: bool,
        start: Instant,
    ) -> std::result::Result<MaybeTlsStream, Response> {
        let state = &self.state;

        let dns_cache = state
            .dns
            .lock()
            .expect("DNS cache slot mutex poisoned")
            .clone();
        let dns_start = Instant::now();
        let addrs = match &dns_cache {
            Some(cache) => cache.resolve(host, port).await,
            None => dns::resolve_host(host, port).await,
        };
        state.stats.record_dns_lookup(dns_start.elapsed(), false);
        if addrs.is_empty() {
            state.stats.record_error(ErrorKind::DnsFailure);
            return Err(self.failure_response(start));
        }

        let tcp_start = Instant::now();
        let connected = connector::connect(host, &addrs, CONNECT_TIMEOUT).await;
        state.stats.record_tcp_handshake(tcp_start.elapsed());
        let tcp = match connected {
            Ok(tcp) => tcp,
            Err(err) => {
                tracing::debug!("connect to {host}:{port} failed: {err}");
                state.stats.record_error(ErrorKind::ConnectionFailed);
                return Err(self.failure_response(start));
            }
        };

        if let Ok(peer) = tcp.peer_addr() {
            state.stats.set_endpoint(&peer.ip().to_string(), host, tls);
        }

        let stream = if tls {
            match state.tls.handshake(tcp, host).await {
                Ok(stream) => MaybeTlsStream::Tls(Box::new(stream)),
                Err(err) => {
                    tracing::debug!("TLS handshake with {host} failed: {err}");
                    state.stats.record_error(ErrorKind::TlsHandshakeFailed);
                    return Err(self.failure_response(start));
                }
            }
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        state.stats.record_connection(false);
        Ok(stream)
    }

    fn failure_response(&self, start: Instant) -> Response {
        let mut resp = Response::failure();
        resp.elapsed_time = start.elapsed();
        resp
    }

    fn config(&self) -> Config {
        self.state.config.lock().expect("client config mutex poisoned").clone()
    }

    pub(crate) fn progress_observer(&self) -> &dyn ProgressObserver {
        self.state.progress.as_ref()
    }

    // Runtime configuration

    pub fn set_user_agent(&self, user_agent: impl Into<String>) {
        self.state.config.lock().expect("client config mutex poisoned").user_agent = user_agent.into();
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.state.config.lock().expect("client config mutex poisoned").default_timeout = timeout;
    }

    pub fn set_compression(&self, enabled: bool) {
        self.state.config.lock().expect("client config mutex poisoned").enable_compression = enabled;
    }

    /// Replace the rate limit; a rate of zero or less disables it.
    pub fn set_rate_limit(&self, rate: f64, burst: usize) {
        self.state.limiter.set_rate(rate, burst);
    }

    /// Turn the DNS cache on with the given TTL.
    pub fn enable_dns_cache(&self, ttl: Duration) {
        *self.state.dns.lock().expect("DNS cache slot mutex poisoned") = Some(Arc::new(DnsCache::new(ttl)));
    }

    pub fn disable_dns_cache(&self) {
        *self.state.dns.lock().expect("DNS cache slot mutex poisoned") = None;
    }

    /// Pre-resolve hosts on both default ports.
    pub async fn warmup_dns(&self, hosts: &[impl AsRef<str>]) {
        let cache = self.state.dns.lock().expect("DNS cache slot mutex poisoned").clone();
        if let Some(cache) = cache {
            for host in hosts {
                cache.warmup(host.as_ref(), 443).await;
                cache.warmup(host.as_ref(), 80).await;
            }
        }
    }

    pub fn dns_cache_stats(&self) -> Option<DnsCacheStats> {
        self.state
            .dns
            .lock()
            .expect("DNS cache slot mutex poisoned")
            .as_ref()
            .map(|cache| cache.stats())
    }

    /// Reap idle pooled connections and expired DNS entries.
    pub fn cleanup(&self) {
        self.state.pool.cleanup_idle();
        let cache = self.state.dns.lock().expect("DNS cache slot mutex poisoned").clone();
        if let Some(cache) = cache {
            cache.cleanup();
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.state.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.state.stats.reset();
    }
}
