//! Rate limiting applied to the request path.

use std::time::{Duration, Instant};

use crawl::Client;

mod helpers;
use helpers::mock_server::{ok_body, MockServer};

#[tokio::test]
async fn test_rate_limit_paces_requests() {
    let server = MockServer::start(|_| ok_body("ok").into()).await.unwrap();
    // empty bucket at 100 req/s: every request waits ~10ms for a token
    let client = Client::builder().rate_limit(100.0, 1).build().unwrap();

    let start = Instant::now();
    for _ in 0..5 {
        let resp = client.get(&server.url()).await;
        assert_eq!(resp.status_code, 200);
    }
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[tokio::test]
async fn test_window_bound_holds() {
    let server = MockServer::start(|_| ok_body("ok").into()).await.unwrap();
    let rate = 50.0;
    let burst = 5;
    let client = Client::builder().rate_limit(rate, burst).build().unwrap();

    let window = Duration::from_millis(400);
    let start = Instant::now();
    let mut completed: u64 = 0;
    while start.elapsed() < window {
        client.get(&server.url()).await;
        completed += 1;
    }

    // ceil(r*T) + B with some slack for scheduler jitter
    let bound = (rate * window.as_secs_f64()).ceil() as u64 + burst as u64;
    assert!(
        completed <= bound,
        "{completed} requests exceeded bound {bound}"
    );
}

#[tokio::test]
async fn test_disabling_rate_limit_at_runtime() {
    let server = MockServer::start(|_| ok_body("ok").into()).await.unwrap();
    let client = Client::builder().rate_limit(5.0, 1).build().unwrap();

    client.set_rate_limit(0.0, 0);
    let start = Instant::now();
    for _ in 0..20 {
        client.get(&server.url()).await;
    }
    // unlimited: 20 loopback requests finish far faster than 5 req/s would allow
    assert!(start.elapsed() < Duration::from_secs(1));
}
