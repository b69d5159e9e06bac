// Moltbook API client.
//
// The upstream API is rate-limited, intermittently 5xx-flaky, and sits
// behind a CDN that sometimes redirects across hosts. This client paces
// every request against a shared requests-per-minute budget, retries
// retryable failures with server-directed or exponential waits, and follows
// redirects manually; automatic following is disabled because it drops the
// Authorization header on cross-host hops, silently degrading calls to
// anonymous ones.

pub mod error;
pub mod normalize;
pub mod pacing;
pub mod retry;

pub use error::{ClientError, Result};
pub use retry::{RetryPolicy, RetryStep};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, LOCATION, PRAGMA, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use moltgraph_common::{
    AgentRecord, CommentRecord, ModeratorEntry, PostPage, PostRecord, SubmoltRecord,
};
use pacing::RateLimiter;

/// Connection settings for the Moltbook API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub user_agent: String,
    pub requests_per_minute: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            user_agent: "MoltGraphCrawler/0.1".to_string(),
            requests_per_minute: 80,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Whether a call sends the bearer token. Listing endpoints behave better
/// anonymously (no personalized/cached first pages), so most reads go out
/// public-first and only fall back to auth on a 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Public,
    Bearer,
}

pub struct MoltbookClient {
    http: reqwest::Client,
    cfg: ClientConfig,
    limiter: RateLimiter,
}

impl MoltbookClient {
    pub fn new(cfg: ClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build HTTP client");

        let limiter = RateLimiter::new(cfg.requests_per_minute);
        Self { http, cfg, limiter }
    }

    // --- transport ---

    /// Issue a paced, retrying GET and parse the body as JSON.
    /// An empty body parses as an empty object.
    pub async fn get(&self, path: &str, params: &[(&str, String)], auth: Auth) -> Result<Value> {
        self.send(Method::GET, path, params, auth).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        auth: Auth,
    ) -> Result<Value> {
        let url = format!("{}{}", self.cfg.base_url, path);
        let mut last_err = ClientError::Network("request not attempted".to_string());

        for attempt in 0..self.cfg.retry.max_attempts {
            self.limiter.wait_turn().await;

            let resp = match self.exchange(&method, &url, params, auth).await {
                Ok(resp) => resp,
                Err(err) => {
                    last_err = ClientError::from(err);
                    match self.cfg.retry.on_network_error(attempt) {
                        RetryStep::Wait(wait) => {
                            warn!(%url, attempt, wait_secs = wait.as_secs_f64(), "network error, retrying");
                            tokio::time::sleep(wait).await;
                            continue;
                        }
                        RetryStep::GiveUp => break,
                    }
                }
            };

            let status = resp.status();
            if RetryPolicy::is_retryable(status.as_u16()) {
                let step = self
                    .cfg
                    .retry
                    .decide(status.as_u16(), resp.headers(), attempt, unix_now());
                last_err = ClientError::Api {
                    status: status.as_u16(),
                    message: "retry attempts exhausted".to_string(),
                };
                match step {
                    RetryStep::Wait(wait) => {
                        debug!(%url, status = status.as_u16(), wait_secs = wait.as_secs_f64(), "retryable status");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    RetryStep::GiveUp => break,
                }
            }

            if status == StatusCode::UNAUTHORIZED {
                return Err(ClientError::AuthRequired);
            }
            if !status.is_success() {
                let message = resp.text().await.unwrap_or_default();
                return Err(ClientError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let body = resp.bytes().await.map_err(ClientError::from)?;
            if body.is_empty() {
                return Ok(Value::Object(serde_json::Map::new()));
            }
            return serde_json::from_slice(&body).map_err(|e| ClientError::Api {
                status: status.as_u16(),
                message: format!("invalid JSON body: {e}"),
            });
        }

        Err(last_err)
    }

    /// One HTTP exchange, following at most one redirect by hand with the
    /// original headers (Authorization included). A second redirect falls
    /// through as a non-success status.
    async fn exchange(
        &self,
        method: &Method,
        url: &str,
        params: &[(&str, String)],
        auth: Auth,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let resp = self
            .apply_headers(self.http.request(method.clone(), url).query(params), auth)
            .send()
            .await?;

        if resp.status().is_redirection() {
            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| Url::parse(url).ok()?.join(loc).ok());
            if let Some(next) = location {
                debug!(from = url, to = %next, "following redirect manually");
                // Location already carries the resolved query string.
                return self
                    .apply_headers(self.http.request(method.clone(), next), auth)
                    .send()
                    .await;
            }
        }

        Ok(resp)
    }

    fn apply_headers(&self, req: reqwest::RequestBuilder, auth: Auth) -> reqwest::RequestBuilder {
        let req = req
            .header(USER_AGENT, &self.cfg.user_agent)
            .header(ACCEPT, "application/json");
        match auth {
            Auth::Bearer => req.header(
                AUTHORIZATION,
                format!("Bearer {}", self.cfg.api_key),
            ),
            Auth::Public => req
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .header(PRAGMA, HeaderValue::from_static("no-cache")),
        }
    }

    /// Public-endpoint-first fetch with a cache-busting param, retried once
    /// with credentials if the endpoint unexpectedly demands them.
    async fn get_public_first(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let mut busted: Vec<(&str, String)> = params.to_vec();
        busted.push(("shuffle", unix_millis().to_string()));
        match self.get(path, &busted, Auth::Public).await {
            Err(ClientError::AuthRequired) => self.get(path, params, Auth::Bearer).await,
            other => other,
        }
    }

    // --- agents ---

    pub async fn me(&self) -> Result<Option<AgentRecord>> {
        let resp = self.get("/agents/me", &[], Auth::Bearer).await?;
        Ok(object_record(&resp, &["agent"]))
    }

    pub async fn agent_profile(&self, name: &str) -> Result<Option<AgentRecord>> {
        let params = [("name", name.to_string())];
        let resp = self.get("/agents/profile", &params, Auth::Bearer).await?;
        Ok(object_record(&resp, &["agent"]))
    }

    // --- submolts ---

    pub async fn list_submolts(
        &self,
        sort: &str,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<SubmoltRecord>> {
        let params = [
            ("sort", sort.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        let resp = self.get_public_first("/submolts", &params).await?;
        Ok(list_records(&resp, &["submolts", "data"]))
    }

    pub async fn submolt(&self, name: &str) -> Result<Option<SubmoltRecord>> {
        let resp = self
            .get_public_first(&format!("/submolts/{name}"), &[])
            .await?;
        Ok(object_record(&resp, &["submolt"]))
    }

    pub async fn moderators(&self, name: &str) -> Result<Vec<ModeratorEntry>> {
        let resp = self
            .get_public_first(&format!("/submolts/{name}/moderators"), &[])
            .await?;
        Ok(list_records(&resp, &["moderators", "data"]))
    }

    // --- posts / comments ---

    pub async fn list_posts(
        &self,
        sort: &str,
        time_window: Option<&str>,
        submolt: Option<&str>,
        limit: u32,
        offset: u64,
    ) -> Result<PostPage> {
        let mut params = vec![
            ("sort", sort.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        if let Some(window) = time_window {
            params.push(("time", window.to_string()));
        }
        if let Some(submolt) = submolt {
            params.push(("submolt", submolt.to_string()));
        }
        let resp = self.get_public_first("/posts", &params).await?;
        Ok(post_page(&resp))
    }

    pub async fn post_detail(&self, post_id: &str) -> Result<Option<PostRecord>> {
        let resp = self.get_public_first(&format!("/posts/{post_id}"), &[]).await?;
        Ok(object_record(&resp, &["post"]))
    }

    pub async fn comments(
        &self,
        post_id: &str,
        sort: &str,
        limit: u32,
    ) -> Result<Vec<CommentRecord>> {
        let params = [("sort", sort.to_string()), ("limit", limit.to_string())];
        let resp = self
            .get_public_first(&format!("/posts/{post_id}/comments"), &params)
            .await?;
        Ok(list_records(&resp, &["comments", "data"]))
    }

    // --- personalized feed ---

    pub async fn feed(&self, sort: &str, limit: u32, offset: u64) -> Result<Vec<PostRecord>> {
        let params = [
            ("sort", sort.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        let resp = self.get("/feed", &params, Auth::Bearer).await?;
        Ok(list_records(&resp, &["posts", "data"]))
    }
}

// --- envelope helpers ---

fn list_records<T: DeserializeOwned>(resp: &Value, candidate_keys: &[&str]) -> Vec<T> {
    normalize::extract_list(resp, candidate_keys)
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

fn object_record<T: DeserializeOwned>(resp: &Value, candidate_keys: &[&str]) -> Option<T> {
    let obj = normalize::extract_object(resp, candidate_keys);
    if obj.is_empty() {
        return None;
    }
    serde_json::from_value(Value::Object(obj)).ok()
}

fn post_page(resp: &Value) -> PostPage {
    PostPage {
        posts: list_records(resp, &["posts", "data"]),
        has_more: truthy(resp.get("has_more")),
        next_offset: next_offset(resp.get("next_offset")),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

/// The server's declared next offset: absent, numeric, or a numeric string.
fn next_offset(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn post_page_reads_envelope_fields() {
        let resp = json!({
            "success": true,
            "posts": [{"id": "a"}, {"id": "b"}],
            "has_more": true,
            "next_offset": 100
        });
        let page = post_page(&resp);
        assert_eq!(page.posts.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.next_offset, Some(100));
    }

    #[test]
    fn post_page_tolerates_bare_array() {
        let page = post_page(&json!([{"id": "a"}]));
        assert_eq!(page.posts.len(), 1);
        assert!(!page.has_more);
        assert_eq!(page.next_offset, None);
    }

    #[test]
    fn next_offset_accepts_numeric_strings() {
        assert_eq!(next_offset(Some(&json!("150"))), Some(150));
        assert_eq!(next_offset(Some(&json!(150))), Some(150));
        assert_eq!(next_offset(Some(&json!("soon"))), None);
        assert_eq!(next_offset(Some(&json!(null))), None);
        assert_eq!(next_offset(None), None);
    }

    #[test]
    fn truthy_handles_drifting_flag_types() {
        assert!(truthy(Some(&json!(true))));
        assert!(truthy(Some(&json!(1))));
        assert!(!truthy(Some(&json!(false))));
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(Some(&json!(null))));
        assert!(!truthy(None));
    }

    #[test]
    fn unparseable_items_are_skipped() {
        let resp = json!({"posts": [{"id": "a"}, "not an object", {"id": "b"}]});
        let records: Vec<PostRecord> = list_records(&resp, &["posts"]);
        assert_eq!(records.len(), 2);
    }
}
