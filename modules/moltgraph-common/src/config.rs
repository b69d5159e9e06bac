use std::env;
use std::fmt::Debug;
use std::str::FromStr;

/// Application configuration loaded from environment variables.
///
/// Only the Neo4j credentials and the Moltbook API key are required; every
/// tuning knob falls back to the defaults the crawler has run with in
/// production.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    // Moltbook API
    pub api_key: String,
    pub base_url: String,
    pub web_base_url: String,
    pub user_agent: String,

    // Transport pacing / retry
    pub requests_per_minute: u32,
    pub max_retries: u32,
    pub retry_backoff_secs: f64,
    pub http_timeout_secs: u64,

    // Posts paging
    pub posts_page_size: u32,
    pub posts_max_pages: u32,
    pub max_stale_pages: u32,
    pub max_repeat_pages: u32,
    /// Raw `sort:window|sort:window` view override, parsed by the crawler.
    pub post_views: Option<String>,

    // Submolt seeding / enrichment
    pub submolt_top_limit: u32,
    pub enrich_submolts: bool,
    pub enrich_submolts_limit: usize,
    pub moderator_submolts_limit: usize,

    // Posts / comments enrichment
    pub fetch_post_details: bool,
    pub crawl_comments: bool,
    pub comments_limit_per_post: u32,

    // Agent profiles
    pub fetch_agent_profiles: bool,
    pub profile_limit: usize,
    pub profile_refresh_days: i64,
    pub profile_refresh_limit: usize,

    // Best-effort HTML scrape of agent pages
    pub scrape_agent_html: bool,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            neo4j_uri: required_env("NEO4J_URI"),
            neo4j_user: required_env("NEO4J_USER"),
            neo4j_password: required_env("NEO4J_PASSWORD"),

            api_key: required_env("MOLTBOOK_API_KEY"),
            base_url: env::var("MOLTBOOK_BASE_URL")
                .unwrap_or_else(|_| "https://www.moltbook.com/api/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            web_base_url: env::var("MOLTBOOK_WEB_URL")
                .unwrap_or_else(|_| "https://www.moltbook.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            user_agent: env::var("USER_AGENT")
                .unwrap_or_else(|_| "MoltGraphCrawler/0.1".to_string()),

            requests_per_minute: parsed_env("REQUESTS_PER_MINUTE", 80),
            max_retries: parsed_env("MAX_RETRIES", 8),
            retry_backoff_secs: parsed_env("RETRY_BACKOFF_SECONDS", 1.5),
            http_timeout_secs: parsed_env("HTTP_TIMEOUT_SECONDS", 60),

            posts_page_size: parsed_env("POSTS_PAGE_SIZE", 50),
            posts_max_pages: parsed_env("POSTS_MAX_PAGES", 0),
            max_stale_pages: parsed_env("MAX_STALE_PAGES", 4),
            max_repeat_pages: parsed_env("MAX_REPEAT_PAGES", 2),
            post_views: env::var("POST_VIEWS").ok().filter(|v| !v.trim().is_empty()),

            submolt_top_limit: parsed_env("SUBMOLT_TOP_LIMIT", 100),
            enrich_submolts: flag_env("ENRICH_SUBMOLTS", false),
            enrich_submolts_limit: parsed_env("ENRICH_SUBMOLTS_LIMIT", 0),
            moderator_submolts_limit: parsed_env("MODERATOR_SUBMOLTS_LIMIT", 500),

            fetch_post_details: flag_env("FETCH_POST_DETAILS", false),
            crawl_comments: flag_env("CRAWL_COMMENTS", true),
            comments_limit_per_post: parsed_env("COMMENTS_LIMIT_PER_POST", 200),

            fetch_agent_profiles: flag_env("FETCH_AGENT_PROFILES", true),
            profile_limit: parsed_env("PROFILE_LIMIT", 0),
            profile_refresh_days: parsed_env("PROFILE_REFRESH_DAYS", 7),
            profile_refresh_limit: parsed_env("PROFILE_REFRESH_LIMIT", 500),

            scrape_agent_html: flag_env("SCRAPE_AGENT_HTML", false),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Debug,
{
    match env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|e| panic!("{key} must parse: {e:?}")),
        Err(_) => default,
    }
}

fn flag_env(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => v == "1",
        Err(_) => default,
    }
}
