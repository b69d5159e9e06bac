use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use moltbook_client::{ClientConfig, MoltbookClient, RetryPolicy};
use moltgraph_common::Config;
use moltgraph_crawler::crawl::{CrawlMode, Crawler};
use moltgraph_graph::{migrate::migrate, GraphClient, GraphStore};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Unbounded multi-view scan.
    Full,
    /// Scan down to the previous run's cutoff.
    Incremental,
}

#[derive(Parser)]
#[command(name = "moltgraph-crawler", about = "Mirror Moltbook into a temporal Neo4j graph")]
struct Args {
    #[arg(value_enum, default_value = "incremental")]
    mode: Mode,

    /// Resume an earlier run's checkpoints instead of starting fresh.
    #[arg(long)]
    resume: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("moltgraph_crawler=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("Moltgraph crawler starting...");

    // Missing credentials fail here, before any stage runs.
    let config = Config::from_env();

    let graph = GraphClient::connect(
        &config.neo4j_uri,
        &config.neo4j_user,
        &config.neo4j_password,
    )
    .await?;
    migrate(&graph).await?;
    let store = GraphStore::new(graph);

    let client = MoltbookClient::new(ClientConfig {
        base_url: config.base_url.clone(),
        api_key: config.api_key.clone(),
        user_agent: config.user_agent.clone(),
        requests_per_minute: config.requests_per_minute,
        timeout: std::time::Duration::from_secs(config.http_timeout_secs),
        retry: RetryPolicy {
            max_attempts: config.max_retries,
            backoff_seed: std::time::Duration::from_secs_f64(config.retry_backoff_secs),
            ..RetryPolicy::default()
        },
    });

    let mode = match args.mode {
        Mode::Full => CrawlMode::Full,
        Mode::Incremental => CrawlMode::Incremental,
    };

    let crawler = Crawler::new(client, store, config);
    crawler.run(mode, args.resume).await?;

    Ok(())
}
