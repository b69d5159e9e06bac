// Crawl orchestration: one pipeline, two parameterizations.
//
// A full crawl walks every configured view unbounded; an incremental crawl
// walks the chronological view down to the previous run's cutoff. Both
// share the same stage sequence: open crawl → seed submolts → scan views →
// upsert discoveries → refresh moderators → refresh profiles → optional
// HTML enrichment → feed snapshot → close crawl. Every stage is isolated:
// a failed stage contributes zero records and the run continues.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use moltbook_client::{ClientError, MoltbookClient};
use moltgraph_common::{CommentRecord, Config, PostPage, PostRecord, XAccountRecord};
use moltgraph_graph::GraphStore;

use crate::extract::{collect_comment_authors, moderator_agents, SubmoltCatalog};
use crate::scanner::{PageOutcome, PageSink, PageSource, ScanConfig, ViewScanner};
use crate::scrape::AgentPageScraper;
use crate::views::{default_views, parse_views, View};

/// Discovery source tag on SIMILAR_TO edges found via the HTML rail.
const HTML_PROFILE_SOURCE: &str = "html_profile";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Unbounded multi-view scan.
    Full,
    /// Cutoff-bounded scan of the chronological view; cutoff is the
    /// previous run's start time.
    Incremental,
}

impl CrawlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CrawlMode::Full => "full",
            CrawlMode::Incremental => "incremental",
        }
    }
}

/// Mutable state threaded through a single run.
#[derive(Default)]
struct RunState {
    seen_posts: HashSet<String>,
    commented_posts: HashSet<String>,
    /// Full nested trees harvested from post-detail responses, consumed by
    /// the comment stage so those posts skip the capped comments endpoint.
    detail_comments: HashMap<String, Vec<CommentRecord>>,
    submolts: SubmoltCatalog,
    agents: HashSet<String>,
    posts_written: usize,
    comments_written: usize,
}

pub struct Crawler {
    client: MoltbookClient,
    store: GraphStore,
    config: Config,
}

impl Crawler {
    pub fn new(client: MoltbookClient, store: GraphStore, config: Config) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Run one crawl. `resume` re-enters an earlier run's checkpoints
    /// instead of starting a fresh one.
    pub async fn run(&self, mode: CrawlMode, resume: Option<String>) -> Result<()> {
        let crawl_id =
            resume.unwrap_or_else(|| format!("{}:{}", mode.as_str(), Uuid::new_v4()));
        let observed_at = Utc::now();

        // The previous cutoff must be read before this run records its own.
        let cutoff = match mode {
            CrawlMode::Incremental => match self.store.latest_cutoff().await {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "could not read previous cutoff; scanning unbounded");
                    None
                }
            },
            CrawlMode::Full => None,
        };

        self.store
            .begin_crawl(&crawl_id, mode.as_str(), &observed_at)
            .await?;
        info!(crawl_id = crawl_id.as_str(), mode = mode.as_str(), ?cutoff, "crawl started");

        let mut run = RunState::default();

        if let Err(e) = self.save_me(&observed_at).await {
            warn!(error = %e, "me stage failed");
        }

        let top_submolts = match self.seed_submolts(&observed_at).await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "submolt seed stage failed");
                Vec::new()
            }
        };

        self.scan_views(mode, cutoff, &crawl_id, &observed_at, &mut run)
            .await;

        if let Err(e) = self.save_discovered_submolts(&observed_at, &run).await {
            warn!(error = %e, "discovered submolt stage failed");
        }

        if let Err(e) = self
            .refresh_moderators(&observed_at, &mut run, &top_submolts)
            .await
        {
            warn!(error = %e, "moderator stage failed");
        }

        if self.config.fetch_agent_profiles {
            if let Err(e) = self.refresh_profiles(mode, &observed_at, &run).await {
                warn!(error = %e, "profile stage failed");
            }
        }

        if self.config.scrape_agent_html {
            if let Err(e) = self.scrape_agent_pages(&observed_at, &run).await {
                warn!(error = %e, "html scrape stage failed");
            }
        }

        if let Err(e) = self.snapshot_feed(&crawl_id, &observed_at).await {
            warn!(error = %e, "feed snapshot stage failed");
        }

        if let Err(e) = self.store.end_crawl(&crawl_id).await {
            warn!(error = %e, "failed to close crawl record");
        }

        info!(
            crawl_id = crawl_id.as_str(),
            posts = run.posts_written,
            comments = run.comments_written,
            submolts = run.submolts.len(),
            agents = run.agents.len(),
            "crawl finished"
        );
        Ok(())
    }

    // ---- Stage 1: authenticated identity ----

    async fn save_me(&self, observed_at: &DateTime<Utc>) -> Result<()> {
        if let Some(me) = self.client.me().await? {
            self.store.upsert_agents(&[me], observed_at, false).await?;
        }
        Ok(())
    }

    // ---- Stage 2: submolt top slice ----

    /// Seed the top submolts by popularity. The endpoint's offset pagination
    /// is broken in production, so this is a single public top slice.
    async fn seed_submolts(&self, observed_at: &DateTime<Utc>) -> Result<Vec<String>> {
        if self.config.submolt_top_limit == 0 {
            return Ok(Vec::new());
        }
        let seed = self
            .client
            .list_submolts("popular", self.config.submolt_top_limit, 0)
            .await?;
        if seed.is_empty() {
            return Ok(Vec::new());
        }
        self.store.upsert_submolts(&seed, observed_at).await?;
        info!(count = seed.len(), "seeded top submolts");

        if self.config.enrich_submolts {
            let mut enriched = Vec::new();
            for submolt in &seed {
                let Some(name) = submolt.name.as_deref() else {
                    continue;
                };
                if self.config.enrich_submolts_limit > 0
                    && enriched.len() >= self.config.enrich_submolts_limit
                {
                    break;
                }
                match self.client.submolt(name).await {
                    Ok(Some(detail)) => enriched.push(detail),
                    Ok(None) => enriched.push(submolt.clone()),
                    Err(e) => {
                        debug!(submolt = name, error = %e, "submolt detail fetch failed");
                        enriched.push(submolt.clone());
                    }
                }
            }
            if !enriched.is_empty() {
                self.store.upsert_submolts(&enriched, observed_at).await?;
                info!(count = enriched.len(), "enriched seeded submolts");
            }
        }

        Ok(seed.iter().filter_map(|s| s.name.clone()).collect())
    }

    // ---- Stage 3: view scan ----

    async fn scan_views(
        &self,
        mode: CrawlMode,
        cutoff: Option<DateTime<Utc>>,
        crawl_id: &str,
        observed_at: &DateTime<Utc>,
        run: &mut RunState,
    ) {
        let views = match mode {
            CrawlMode::Incremental => vec![View::new("new", None)],
            CrawlMode::Full => self
                .config
                .post_views
                .as_deref()
                .map(parse_views)
                .unwrap_or_else(default_views),
        };

        let scan_cfg = ScanConfig {
            page_size: self.config.posts_page_size,
            max_pages: self.config.posts_max_pages,
            max_stale_pages: self.config.max_stale_pages,
            max_repeat_pages: self.config.max_repeat_pages,
        };
        let source = ApiPageSource {
            client: &self.client,
        };

        for view in &views {
            let start_offset = match self
                .store
                .get_checkpoint(crawl_id, &view.checkpoint_key())
                .await
            {
                Ok(offset) => offset,
                Err(e) => {
                    warn!(view = %view.label(), error = %e, "checkpoint read failed; skipping view");
                    continue;
                }
            };

            let scanner = ViewScanner::new(scan_cfg.clone()).with_cutoff(cutoff);
            let mut sink = ScanSink {
                client: &self.client,
                store: &self.store,
                config: &self.config,
                crawl_id,
                observed_at: *observed_at,
                run: &mut *run,
            };

            match scanner.scan(&source, &mut sink, view, start_offset).await {
                Ok(scan) => {
                    debug!(view = %view.label(), stop = ?scan.stop, pages = scan.pages, "view complete")
                }
                Err(e) => warn!(view = %view.label(), error = %e, "view scan failed"),
            }
        }
    }

    // ---- Stage 4: submolts discovered while scanning ----

    async fn save_discovered_submolts(
        &self,
        observed_at: &DateTime<Utc>,
        run: &RunState,
    ) -> Result<()> {
        if run.submolts.is_empty() {
            return Ok(());
        }
        let written = self
            .store
            .upsert_submolts(&run.submolts.records(), observed_at)
            .await?;
        info!(count = written, "upserted submolts discovered from posts");
        Ok(())
    }

    // ---- Stage 5: moderator refresh + MODERATES reconciliation ----

    async fn refresh_moderators(
        &self,
        observed_at: &DateTime<Utc>,
        run: &mut RunState,
        top_submolts: &[String],
    ) -> Result<()> {
        if self.config.moderator_submolts_limit == 0 {
            return Ok(());
        }

        let mut candidates = run.submolts.names();
        for name in top_submolts {
            if !candidates.contains(name) {
                candidates.push(name.clone());
            }
        }
        candidates.truncate(self.config.moderator_submolts_limit);
        if candidates.is_empty() {
            return Ok(());
        }

        info!(count = candidates.len(), "refreshing moderator lists");
        let mut refreshed = 0usize;
        for name in &candidates {
            let entries = match self.client.moderators(name).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(submolt = name.as_str(), error = %e, "moderator fetch failed");
                    continue;
                }
            };
            if entries.is_empty() {
                continue;
            }

            if let Err(e) = self
                .store
                .reconcile_moderators(name, &entries, observed_at)
                .await
            {
                warn!(submolt = name.as_str(), error = %e, "moderator reconciliation failed");
                continue;
            }

            // Moderator wrappers often embed full agent profiles; bank them.
            let agents = moderator_agents(&entries);
            if !agents.is_empty() {
                if let Err(e) = self.store.upsert_agents(&agents, observed_at, true).await {
                    warn!(submolt = name.as_str(), error = %e, "moderator agent upsert failed");
                }
            }
            for entry in &entries {
                if let Some(agent) = entry.resolved_name() {
                    run.agents.insert(agent.to_string());
                }
            }
            refreshed += 1;
        }
        info!(refreshed, "moderator lists reconciled");
        Ok(())
    }

    // ---- Stage 6: agent profile refresh ----

    async fn refresh_profiles(
        &self,
        mode: CrawlMode,
        observed_at: &DateTime<Utc>,
        run: &RunState,
    ) -> Result<()> {
        let mut names: Vec<String> = run.agents.iter().cloned().collect();

        // Incremental runs also sweep profiles that have gone stale in the
        // store, regardless of whether this run observed the agent.
        if mode == CrawlMode::Incremental {
            match self
                .store
                .stale_agent_profiles(
                    self.config.profile_refresh_days,
                    self.config.profile_refresh_limit,
                )
                .await
            {
                Ok(stale) => {
                    for name in stale {
                        if !names.contains(&name) {
                            names.push(name);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "stale profile query failed"),
            }
        }

        names.sort();
        if mode == CrawlMode::Full && self.config.profile_limit > 0 {
            names.truncate(self.config.profile_limit);
        }
        if names.is_empty() {
            return Ok(());
        }

        info!(count = names.len(), "fetching agent profiles");
        let mut fetched = 0usize;
        for name in &names {
            match self.client.agent_profile(name).await {
                Ok(Some(agent)) => {
                    if let Err(e) = self.store.upsert_agents(&[agent], observed_at, true).await {
                        warn!(agent = name.as_str(), error = %e, "profile upsert failed");
                        continue;
                    }
                    fetched += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(agent = name.as_str(), error = %e, "profile fetch failed");
                }
            }
        }
        info!(fetched, "agent profiles refreshed");
        Ok(())
    }

    // ---- Stage 7: best-effort HTML enrichment ----

    async fn scrape_agent_pages(&self, observed_at: &DateTime<Utc>, run: &RunState) -> Result<()> {
        if run.agents.is_empty() {
            return Ok(());
        }
        let scraper = AgentPageScraper::new(&self.config.web_base_url, &self.config.user_agent);

        let mut names: Vec<&String> = run.agents.iter().collect();
        names.sort();
        info!(count = names.len(), "scraping agent pages");

        for name in names {
            let page = match scraper.scrape(name).await {
                Ok(page) => page,
                Err(e) => {
                    debug!(agent = name.as_str(), error = %e, "agent page scrape failed");
                    continue;
                }
            };
            if let Some(handle) = &page.owner_x_handle {
                let mut account = XAccountRecord::new(handle);
                account.url = page.owner_x_url.clone();
                if let Err(e) = self.store.upsert_x_owner(name, &account, observed_at).await {
                    warn!(agent = name.as_str(), error = %e, "x owner upsert failed");
                }
            }
            if !page.similar_agents.is_empty() {
                if let Err(e) = self
                    .store
                    .reconcile_similar(name, &page.similar_agents, HTML_PROFILE_SOURCE, observed_at)
                    .await
                {
                    warn!(agent = name.as_str(), error = %e, "similar reconciliation failed");
                }
            }
        }
        Ok(())
    }

    // ---- Stage 8: feed snapshot ----

    async fn snapshot_feed(&self, crawl_id: &str, observed_at: &DateTime<Utc>) -> Result<()> {
        let posts = self.client.feed("hot", 100, 0).await?;
        if posts.is_empty() {
            return Ok(());
        }
        let written = self
            .store
            .write_feed_snapshot(crawl_id, "hot", &posts, observed_at)
            .await?;
        info!(count = written, "feed snapshot written");
        Ok(())
    }
}

// ---- Scanner seams over the live client and store ----

struct ApiPageSource<'a> {
    client: &'a MoltbookClient,
}

#[async_trait]
impl PageSource for ApiPageSource<'_> {
    async fn fetch(&self, view: &View, offset: u64, limit: u32) -> Result<PostPage, ClientError> {
        self.client
            .list_posts(&view.sort, view.window.as_deref(), None, limit, offset)
            .await
    }
}

struct ScanSink<'a> {
    client: &'a MoltbookClient,
    store: &'a GraphStore,
    config: &'a Config,
    crawl_id: &'a str,
    observed_at: DateTime<Utc>,
    run: &'a mut RunState,
}

#[async_trait]
impl PageSink for ScanSink<'_> {
    async fn page(&mut self, _view: &View, posts: &[PostRecord]) -> Result<PageOutcome> {
        let mut new_ids = 0usize;
        for post in posts {
            if let Some(id) = post.id.as_deref() {
                if self.run.seen_posts.insert(id.to_string()) {
                    new_ids += 1;
                }
            }
            if let Some(submolt) = &post.submolt {
                self.run.submolts.observe(submolt);
            }
            if let Some(author) = post.author_name() {
                self.run.agents.insert(author.to_string());
            }
        }

        // Optional per-post detail enrichment. Details carry the full nested
        // comment tree, which beats the capped comments endpoint.
        let enriched_storage;
        let batch: &[PostRecord] = if self.config.fetch_post_details {
            let mut enriched = Vec::with_capacity(posts.len());
            for post in posts {
                let Some(id) = post.id.as_deref() else {
                    continue;
                };
                match self.client.post_detail(id).await {
                    Ok(Some(detail)) => {
                        if self.config.crawl_comments
                            && !self.run.commented_posts.contains(id)
                        {
                            if let Some(tree) = &detail.comments {
                                if !tree.is_empty() {
                                    self.run
                                        .detail_comments
                                        .insert(id.to_string(), tree.clone());
                                }
                            }
                        }
                        enriched.push(detail);
                    }
                    Ok(None) => enriched.push(post.clone()),
                    Err(e) => {
                        debug!(post = id, error = %e, "post detail fetch failed");
                        enriched.push(post.clone());
                    }
                }
            }
            enriched_storage = enriched;
            &enriched_storage
        } else {
            posts
        };

        let written = self.store.upsert_posts(batch, &self.observed_at).await?;
        self.run.posts_written += written;

        if self.config.crawl_comments {
            for post in batch {
                let Some(id) = post.id.as_deref() else {
                    continue;
                };
                if self.run.commented_posts.contains(id) {
                    continue;
                }
                self.run.commented_posts.insert(id.to_string());

                let tree = match self.run.detail_comments.remove(id) {
                    Some(tree) => Some(tree),
                    None => match self
                        .client
                        .comments(id, "new", self.config.comments_limit_per_post)
                        .await
                    {
                        Ok(tree) => Some(tree),
                        Err(e) => {
                            debug!(post = id, error = %e, "comment fetch failed");
                            None
                        }
                    },
                };

                let Some(tree) = tree else { continue };
                if tree.is_empty() {
                    continue;
                }
                match self
                    .store
                    .upsert_comments(id, &tree, &self.observed_at)
                    .await
                {
                    Ok(written) => {
                        self.run.comments_written += written;
                        collect_comment_authors(&tree, &mut self.run.agents);
                    }
                    Err(e) => warn!(post = id, error = %e, "comment upsert failed"),
                }
            }
        }

        Ok(PageOutcome { new_ids })
    }

    async fn save_offset(&mut self, view: &View, offset: u64) -> Result<()> {
        self.store
            .set_checkpoint(self.crawl_id, &view.checkpoint_key(), offset)
            .await?;
        Ok(())
    }
}
