//! Transport behavior tests against a minimal local HTTP fixture.
//!
//! The fixture is a raw TCP listener that serves one scripted response per
//! connection and records every request head, which is enough to verify the
//! redirect, auth-fallback, retry and empty-body rules end to end.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use moltbook_client::{Auth, ClientConfig, ClientError, MoltbookClient, RetryPolicy};

/// Serves scripted responses in connection order and records request heads.
/// `{base}` in a scripted response is replaced with the server's own URL, so
/// scripts can redirect back to themselves.
struct FixtureServer {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FixtureServer {
    async fn start(responses: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        let addr = listener.local_addr().expect("local addr");
        let base_url = format!("http://{addr}");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        let base = base_url.clone();
        tokio::spawn(async move {
            let mut responses = responses.into_iter();
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let Ok(n) = socket.read(&mut buf).await else {
                        break;
                    };
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                    if head.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                recorded
                    .lock()
                    .expect("request log lock")
                    .push(String::from_utf8_lossy(&head).to_string());

                let Some(response) = responses.next() else {
                    break;
                };
                let _ = socket
                    .write_all(response.replace("{base}", &base).as_bytes())
                    .await;
                let _ = socket.shutdown().await;
            }
        });

        Self { base_url, requests }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("request log lock").clone()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().expect("request log lock").len()
    }
}

fn response(status_line: &str, extra_headers: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status_line}\r\nConnection: close\r\n{extra_headers}Content-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

fn client_for(server: &FixtureServer) -> MoltbookClient {
    MoltbookClient::new(ClientConfig {
        // High budget so pacing sleeps stay negligible in tests.
        requests_per_minute: 60_000,
        timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 4,
            backoff_seed: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(50),
            rate_limit_cooldown: Duration::from_millis(10),
        },
        ..ClientConfig::new(&server.base_url, "test-key")
    })
}

#[tokio::test]
async fn redirect_followed_once_with_auth_preserved() {
    let server = FixtureServer::start(vec![
        response("302 Found", "Location: {base}/final\r\n", ""),
        response("200 OK", "Content-Type: application/json\r\n", "{\"ok\":true}"),
    ])
    .await;

    let client = client_for(&server);
    let value = client
        .get("/hop", &[], Auth::Bearer)
        .await
        .expect("get failed");
    assert_eq!(value["ok"], true);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].starts_with("GET /hop"));
    assert!(requests[1].starts_with("GET /final"));
    // The manual follow re-sends the original Authorization header.
    assert!(requests[1]
        .to_lowercase()
        .contains("authorization: bearer test-key"));
}

#[tokio::test]
async fn second_redirect_is_not_followed() {
    let hop = response("302 Found", "Location: {base}/again\r\n", "");
    let server = FixtureServer::start(vec![hop.clone(), hop]).await;

    let client = client_for(&server);
    let err = client.get("/start", &[], Auth::Bearer).await.unwrap_err();
    match err {
        ClientError::Api { status, .. } => assert_eq!(status, 302),
        other => panic!("expected Api error, got {other:?}"),
    }
    assert_eq!(server.request_count(), 2);
}

#[tokio::test]
async fn rate_limited_request_waits_and_retries() {
    let server = FixtureServer::start(vec![
        response("429 Too Many Requests", "Retry-After: 0\r\n", ""),
        response("200 OK", "Content-Type: application/json\r\n", "{\"done\":1}"),
    ])
    .await;

    let client = client_for(&server);
    let value = client
        .get("/limited", &[], Auth::Public)
        .await
        .expect("get failed");
    assert_eq!(value["done"], 1);
    assert_eq!(server.request_count(), 2);
}

#[tokio::test]
async fn server_errors_retry_until_exhausted() {
    let unavailable = response("503 Service Unavailable", "", "");
    let server = FixtureServer::start(vec![unavailable.clone(); 4]).await;

    let client = client_for(&server);
    let err = client.get("/down", &[], Auth::Public).await.unwrap_err();
    match err {
        ClientError::Api { .. } => {}
        other => panic!("expected Api error, got {other:?}"),
    }
    // max_attempts bounds the total tries.
    assert_eq!(server.request_count(), 4);
}

#[tokio::test]
async fn unauthorized_surfaces_distinctly_without_blind_retry() {
    let server = FixtureServer::start(vec![response("401 Unauthorized", "", "")]).await;

    let client = client_for(&server);
    let err = client.get("/private", &[], Auth::Public).await.unwrap_err();
    assert!(matches!(err, ClientError::AuthRequired));
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn public_listing_falls_back_to_auth_on_401() {
    let server = FixtureServer::start(vec![
        response("401 Unauthorized", "", ""),
        response(
            "200 OK",
            "Content-Type: application/json\r\n",
            "{\"posts\":[{\"id\":\"p1\"}],\"has_more\":false}",
        ),
    ])
    .await;

    let client = client_for(&server);
    let page = client
        .list_posts("new", None, None, 50, 0)
        .await
        .expect("list_posts failed");
    assert_eq!(page.posts.len(), 1);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    // Anonymous first, credentialed second.
    assert!(!requests[0].to_lowercase().contains("authorization:"));
    assert!(requests[1]
        .to_lowercase()
        .contains("authorization: bearer test-key"));
}

#[tokio::test]
async fn empty_body_parses_as_empty_object() {
    let server = FixtureServer::start(vec![response("200 OK", "", "")]).await;

    let client = client_for(&server);
    let value = client
        .get("/empty", &[], Auth::Public)
        .await
        .expect("get failed");
    assert_eq!(value, serde_json::json!({}));
}
