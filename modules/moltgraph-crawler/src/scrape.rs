// Best-effort scrape of an agent's public profile page.
//
// The API never exposes the human owner's X link or the "Similar Agents"
// rail; both only exist in the rendered HTML. This is explicitly fragile,
// sits behind SCRAPE_AGENT_HTML, and is never required for correctness: a
// failed scrape contributes nothing and the run moves on.

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::header::USER_AGENT;

static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).unwrap());
static X_HANDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:x\.com|twitter\.com)/([^/?#]+)").unwrap());

#[derive(Debug, Default)]
pub struct AgentPageInfo {
    pub owner_x_handle: Option<String>,
    pub owner_x_url: Option<String>,
    pub similar_agents: Vec<String>,
}

pub struct AgentPageScraper {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl AgentPageScraper {
    pub fn new(base_url: &str, user_agent: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    pub async fn scrape(&self, agent_name: &str) -> Result<AgentPageInfo> {
        let url = format!("{}/u/{}", self.base_url, agent_name);
        let resp = self
            .http
            .get(&url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .context("agent page fetch failed")?
            .error_for_status()
            .context("agent page returned error status")?;
        let html = resp.text().await.context("agent page body read failed")?;
        Ok(parse_agent_page(&html, agent_name))
    }
}

/// Pull the owner's X link and the similar-agents links out of a profile
/// page. The markup is unstable; everything here is best-effort.
pub fn parse_agent_page(html: &str, agent_name: &str) -> AgentPageInfo {
    let mut info = AgentPageInfo::default();

    for href in HREF_RE.captures_iter(html).map(|c| c[1].to_string()) {
        if href.contains("x.com/") || href.contains("twitter.com/") {
            if let Some(m) = X_HANDLE_RE.captures(&href) {
                info.owner_x_handle = Some(m[1].to_string());
                info.owner_x_url = Some(href);
                break;
            }
        }
    }

    if html.contains("Similar Agents") {
        let mut similar = BTreeSet::new();
        for href in HREF_RE.captures_iter(html).map(|c| c[1].to_string()) {
            if let Some(rest) = href.strip_prefix("/u/") {
                let name = rest.split('/').next().unwrap_or_default();
                if !name.is_empty() && !name.eq_ignore_ascii_case(agent_name) {
                    similar.insert(name.to_string());
                }
            }
        }
        info.similar_agents = similar.into_iter().collect();
    }

    info
}
