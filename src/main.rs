//! crawl: command-line HTTP client.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Parser;
use http::Method;

use crawl::dns::DEFAULT_DNS_TTL;
use crawl::{Client, Headers, Request, Response, StatsSnapshot, TransferProgress, Url};

#[derive(Parser, Debug)]
#[command(
    name = "crawl",
    version,
    about = "Fast HTTP client with connection reuse and parallel downloads"
)]
struct Cli {
    /// HTTP method (GET, POST, ...)
    #[arg(short = 'X', long = "request", default_value = "GET")]
    method: String,

    /// Add a custom header ("Name: value"), repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// HTTP request body (switches GET to POST)
    #[arg(short = 'd', long = "data")]
    data: Option<String>,

    /// Write output to a file
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Include response headers in the output
    #[arg(short = 'i', long = "include")]
    include: bool,

    /// Verbose transfer log on stderr
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Follow redirects
    #[arg(short = 'L', long = "location")]
    location: bool,

    /// Read-inactivity timeout in seconds
    #[arg(short = 'm', long = "max-time", default_value_t = 30)]
    max_time: u64,

    /// Custom User-Agent string
    #[arg(short = 'A', long = "user-agent")]
    user_agent: Option<String>,

    /// Retry failed requests N times
    #[arg(short = 'r', long = "retry", default_value_t = 0)]
    retry: u32,

    /// Rate limit in requests per second
    #[arg(short = 'R', long = "rate-limit", default_value_t = 0.0)]
    rate_limit: f64,

    /// Show a progress bar for downloads
    #[arg(short = 'p', long = "progress")]
    progress: bool,

    /// Disable compression
    #[arg(short = 'C', long = "no-compress")]
    no_compress: bool,

    /// Enable DNS caching
    #[arg(short = 'D', long = "dns-cache")]
    dns_cache: bool,

    /// Print client statistics after the transfer
    #[arg(short = 'S', long = "stats")]
    stats: bool,

    /// Batch mode: read URLs from a file (one per line, # comments)
    #[arg(short = 'B', long = "batch")]
    batch: Option<PathBuf>,

    /// Parallel requests (batch mode) or download segments
    #[arg(short = 'P', long = "parallel", default_value_t = 10)]
    parallel: usize,

    /// Emit the response as JSON
    #[arg(short = 'J', long = "json")]
    json: bool,

    /// Pre-warm the DNS cache for a host, repeatable
    #[arg(long = "warmup")]
    warmup: Vec<String>,

    /// Maximum pooled connections
    #[arg(long = "max-conn", default_value_t = 200)]
    max_conn: usize,

    /// Target URL
    url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    run(Cli::parse()).await
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut method = Method::from_bytes(cli.method.as_bytes())
        .with_context(|| format!("invalid method: {}", cli.method))?;
    if cli.data.is_some() && method == Method::GET {
        method = Method::POST;
    }

    let mut headers = Headers::new();
    for header in &cli.headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("invalid header (expected \"Name: value\"): {header}");
        };
        headers.insert(name.trim(), value.trim());
    }

    let progress = Arc::new(TransferProgress::new());

    let mut builder = Client::builder()
        .timeout(Duration::from_secs(cli.max_time))
        .max_connections(cli.max_conn)
        .compression(!cli.no_compress);
    if let Some(user_agent) = &cli.user_agent {
        builder = builder.user_agent(user_agent.as_str());
    }
    if cli.rate_limit > 0.0 {
        builder = builder.rate_limit(cli.rate_limit, (cli.rate_limit * 2.0) as usize);
    }
    if cli.dns_cache {
        builder = builder.dns_cache(DEFAULT_DNS_TTL);
    }
    if cli.progress {
        builder = builder.progress(progress.clone());
    }
    let client = builder.build()?;

    for host in &cli.warmup {
        if cli.verbose {
            eprintln!("* warming up DNS for {host}");
        }
        client.warmup_dns(&[host.as_str()]).await;
    }

    if let Some(batch_file) = &cli.batch {
        return run_batch(&client, &cli, batch_file, &method, &headers).await;
    }

    let Some(url_str) = &cli.url else {
        bail!("URL required");
    };
    let url = Url::parse(url_str).map_err(|e| anyhow::anyhow!("{e}"))?;

    if cli.verbose {
        eprintln!("* connecting to {}:{}", url.host, url.port);
        if cli.dns_cache {
            eprintln!("* DNS caching enabled");
        }
        if cli.rate_limit > 0.0 {
            eprintln!("* rate limit: {} req/s", cli.rate_limit);
        }
    }

    let mut req = Request::new(method, url);
    req.headers = headers;
    req.follow_redirects = cli.location;
    req.timeout = Duration::from_secs(cli.max_time);
    req.max_retries = cli.retry;
    req.enable_compression = !cli.no_compress;
    if let Some(data) = &cli.data {
        req.body = Bytes::from(data.clone().into_bytes());
        if !req.headers.contains("Content-Type") {
            req.headers
                .insert("Content-Type", "application/x-www-form-urlencoded");
        }
    }

    let bar = (cli.progress && cli.output.is_some()).then(|| spawn_progress_bar(progress.clone()));

    let start = Instant::now();
    let resp = if cli.parallel > 1 && cli.output.is_some() {
        // range download when the origin supports it, plain otherwise
        match client.download(&req, cli.parallel).await {
            Some(resp) => resp,
            None => client.request(&req).await,
        }
    } else {
        client.request(&req).await
    };
    let elapsed = start.elapsed();

    if let Some(bar) = bar {
        bar.abort();
        draw_progress(&progress);
        eprintln!();
    }

    if cli.verbose {
        eprintln!("* completed in {} ms", elapsed.as_millis());
        eprintln!("* status: {} {}", resp.status_code, resp.status_message);
        eprintln!("* received: {}", format_size(resp.bytes_received));
        if resp.was_compressed {
            eprintln!("* decompressed to {}", format_size(resp.body.len() as u64));
        }
        if resp.redirect_count > 0 {
            eprintln!("* redirects: {}", resp.redirect_count);
        }
    }

    if resp.status_code == 0 {
        eprintln!("error: request failed");
        if cli.stats {
            print_stats(&client.stats());
        }
        return Ok(ExitCode::from(1));
    }

    if cli.json {
        print_json(url_str, &resp)?;
    } else {
        write_output(&cli, &resp)?;
    }

    if cli.stats {
        print_stats(&client.stats());
    }

    Ok(if resp.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn run_batch(
    client: &Client,
    cli: &Cli,
    path: &PathBuf,
    method: &Method,
    headers: &Headers,
) -> anyhow::Result<ExitCode> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("cannot open {}", path.display()))?;

    let mut requests = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Url::parse(line) {
            Ok(url) => {
                let mut req = Request::new(method.clone(), url);
                req.headers = headers.clone();
                req.follow_redirects = cli.location;
                req.timeout = Duration::from_secs(cli.max_time);
                req.max_retries = cli.retry;
                req.enable_compression = !cli.no_compress;
                requests.push(req);
            }
            Err(_) => eprintln!("warning: invalid URL: {line}"),
        }
    }

    if cli.verbose {
        eprintln!(
            "* processing {} URLs with {} parallel connections",
            requests.len(),
            cli.parallel
        );
    }

    let start = Instant::now();
    let responses = client.batch(requests, cli.parallel).await;
    let elapsed = start.elapsed();

    let success = responses.iter().filter(|r| r.is_success()).count();
    if cli.verbose {
        eprintln!("* completed in {} ms", elapsed.as_millis());
        eprintln!("* success: {success}/{}", responses.len());
    }
    if cli.stats {
        print_stats(&client.stats());
    }

    Ok(if success == responses.len() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn write_output(cli: &Cli, resp: &Response) -> anyhow::Result<()> {
    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(
            fs::File::create(path).with_context(|| format!("cannot open {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };

    if cli.include {
        writeln!(out, "HTTP/1.1 {} {}", resp.status_code, resp.status_message)?;
        for (name, value) in resp.headers.iter() {
            writeln!(out, "{name}: {value}")?;
        }
        writeln!(out)?;
    }
    out.write_all(&resp.body)?;

    if cli.verbose {
        if let Some(path) = &cli.output {
            eprintln!(
                "* saved to {} ({})",
                path.display(),
                format_size(resp.body.len() as u64)
            );
        }
    }
    Ok(())
}

fn print_json(url: &str, resp: &Response) -> anyhow::Result<()> {
    let mut headers = serde_json::Map::new();
    for (name, value) in resp.headers.iter() {
        headers.insert(name.to_string(), serde_json::Value::from(value));
    }
    let doc = serde_json::json!({
        "url": url,
        "status": resp.status_code,
        "status_message": resp.status_message,
        "elapsed_ms": resp.elapsed_time.as_millis() as u64,
        "bytes_received": resp.bytes_received,
        "compressed": resp.was_compressed,
        "redirects": resp.redirect_count,
        "headers": headers,
        "body_length": resp.body.len(),
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn print_stats(stats: &StatsSnapshot) {
    eprintln!();
    eprintln!("requests:       {}", stats.total_requests);
    eprintln!("errors:         {}", stats.total_errors);
    eprintln!("data received:  {}", format_size(stats.bytes_received));
    eprintln!("data sent:      {}", format_size(stats.bytes_sent));
    eprintln!(
        "latency:        avg {:.2} ms, min {} ms, max {} ms",
        stats.avg_latency_ms(),
        stats.latency_min_ms,
        stats.latency_max_ms
    );
    eprintln!(
        "connections:    {} created, {} reused ({:.1}% reuse)",
        stats.connections_created,
        stats.connections_reused,
        stats.reuse_rate() * 100.0
    );
    eprintln!(
        "dns:            {} lookups, {} cache hits, avg {:.2} ms",
        stats.dns_lookups,
        stats.dns_cache_hits,
        stats.avg_dns_ms()
    );
    eprintln!("tcp handshake:  avg {:.2} ms", stats.avg_tcp_ms());
    eprintln!("first byte:     avg {:.2} ms", stats.avg_first_byte_ms());
    if !stats.error_counts.is_empty() {
        eprintln!("error kinds:");
        let mut kinds: Vec<_> = stats.error_counts.iter().collect();
        kinds.sort();
        for (kind, count) in kinds {
            eprintln!("  {kind}: {count}");
        }
    }
}

fn spawn_progress_bar(progress: Arc<TransferProgress>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            draw_progress(&progress);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
}

fn draw_progress(progress: &TransferProgress) {
    const BAR_WIDTH: usize = 40;
    let downloaded = progress.downloaded();
    let total = progress.total();

    if total > 0 {
        let percent = (downloaded as f64 / total as f64 * 100.0).min(100.0);
        let filled = ((percent / 100.0) * BAR_WIDTH as f64) as usize;
        eprint!(
            "\r[{}{}] {percent:5.1}% {}/{}",
            "#".repeat(filled),
            "-".repeat(BAR_WIDTH - filled),
            format_size(downloaded),
            format_size(total)
        );
    } else {
        eprint!("\r{} received", format_size(downloaded));
    }
    let _ = io::stderr().flush();
}

fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;
    match bytes {
        0..=1023 => format!("{bytes}B"),
        KIB..=1048575 => format!("{:.2}KB", bytes as f64 / KIB as f64),
        MIB..=1073741823 => format!("{:.2}MB", bytes as f64 / MIB as f64),
        _ => format!("{:.2}GB", bytes as f64 / GIB as f64),
    }
}
