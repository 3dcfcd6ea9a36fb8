//! Batch execution: ordering and the parallelism window.

use std::time::Duration;

use crawl::{Client, Request, Url};
use http::Method;

mod helpers;
use helpers::mock_server::{ok_body, MockResponse, MockServer};

#[tokio::test]
async fn test_batch_preserves_request_order() {
    let server = MockServer::start(|req| {
        // echo the path so each response is attributable
        let marker = req.path().trim_start_matches('/').to_string();
        ok_body(&marker).into()
    })
    .await
    .unwrap();
    let client = Client::new().unwrap();

    let requests: Vec<Request> = (0..8)
        .map(|i| {
            let url = Url::parse(&format!("{}/item-{i}", server.url())).unwrap();
            Request::new(Method::GET, url)
        })
        .collect();

    let responses = client.batch(requests, 3).await;
    assert_eq!(responses.len(), 8);
    for (i, resp) in responses.iter().enumerate() {
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.text(), format!("item-{i}"));
    }
}

#[tokio::test]
async fn test_batch_respects_parallel_cap() {
    let server = MockServer::start(|_| {
        MockResponse::delayed(ok_body("slow"), Duration::from_millis(150))
    })
    .await
    .unwrap();
    let client = Client::new().unwrap();

    let requests: Vec<Request> = (0..9)
        .map(|_| Request::new(Method::GET, Url::parse(&server.url()).unwrap()))
        .collect();

    let responses = client.batch(requests, 3).await;
    assert!(responses.iter().all(|r| r.status_code == 200));
    assert_eq!(server.request_count(), 9);
    assert!(
        server.max_concurrent() <= 3,
        "window exceeded: {} connections at once",
        server.max_concurrent()
    );
}

#[tokio::test]
async fn test_batch_mixes_failures_into_positions() {
    let server = MockServer::start(|req| {
        if req.path() == "/bad" {
            b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n"
                .to_vec()
                .into()
        } else {
            ok_body("fine").into()
        }
    })
    .await
    .unwrap();
    let client = Client::new().unwrap();

    let mut requests = Vec::new();
    for path in ["/ok", "/bad", "/ok"] {
        let url = Url::parse(&format!("{}{path}", server.url())).unwrap();
        requests.push(Request::new(Method::GET, url));
    }

    let responses = client.batch(requests, 2).await;
    assert_eq!(responses[0].status_code, 200);
    assert_eq!(responses[1].status_code, 500);
    assert_eq!(responses[2].status_code, 200);
}

#[tokio::test]
async fn test_empty_batch() {
    let client = Client::new().unwrap();
    let responses = client.batch(Vec::new(), 4).await;
    assert!(responses.is_empty());
}
