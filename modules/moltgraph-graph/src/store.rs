use chrono::{DateTime, Utc};
use neo4rs::{query, BoltType};
use tracing::debug;

use moltgraph_common::{
    parse_datetime, AgentRecord, CommentRecord, ModeratorEntry, PostRecord, SubmoltRecord,
    XAccountRecord,
};

use crate::rows::{format_datetime, Row};
use crate::GraphClient;

/// Agents and submolts batch comfortably; posts carry author payloads too,
/// so their batches are smaller to keep any single transaction bounded.
const AGENT_BATCH: usize = 500;
const SUBMOLT_BATCH: usize = 500;
const POST_BATCH: usize = 300;
const COMMENT_BATCH: usize = 500;

/// Write-side wrapper for the graph.
///
/// Every upsert is an idempotent MERGE keyed by the entity's natural key,
/// stamped bitemporally: `first_seen_at` once on create, `last_seen_at` on
/// every observation. Payload fields are applied per-field with coalesce so
/// an absent or null field never clobbers a previously stored value.
pub struct GraphStore {
    client: GraphClient,
}

impl GraphStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    // ---- Crawl bookkeeping ----

    pub async fn begin_crawl(
        &self,
        crawl_id: &str,
        mode: &str,
        cutoff: &DateTime<Utc>,
    ) -> Result<(), neo4rs::Error> {
        let now = format_datetime(&Utc::now());
        let q = query(
            "MERGE (cr:Crawl {id: $id})
             ON CREATE SET cr.started_at = datetime($started_at)
             SET cr.mode = $mode,
                 cr.cutoff = datetime($cutoff),
                 cr.last_updated_at = datetime($started_at)",
        )
        .param("id", crawl_id)
        .param("mode", mode)
        .param("cutoff", format_datetime(cutoff))
        .param("started_at", now);
        self.client.graph.run(q).await
    }

    /// Close the crawl record. Called at run completion regardless of how
    /// many stages failed along the way.
    pub async fn end_crawl(&self, crawl_id: &str) -> Result<(), neo4rs::Error> {
        let now = format_datetime(&Utc::now());
        let q = query(
            "MATCH (cr:Crawl {id: $id})
             SET cr.ended_at = datetime($ended_at),
                 cr.last_updated_at = datetime($ended_at)",
        )
        .param("id", crawl_id)
        .param("ended_at", now);
        self.client.graph.run(q).await
    }

    /// Most recent cutoff any crawl has recorded; incremental runs bound
    /// themselves by it.
    pub async fn latest_cutoff(&self) -> Result<Option<DateTime<Utc>>, neo4rs::Error> {
        let q = query(
            "MATCH (cr:Crawl)
             WHERE cr.cutoff IS NOT NULL
             RETURN toString(cr.cutoff) AS cutoff
             ORDER BY cr.cutoff DESC
             LIMIT 1",
        );
        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            let raw: String = row.get("cutoff").unwrap_or_default();
            return Ok(parse_datetime(&raw));
        }
        Ok(None)
    }

    // ---- Checkpoints ----

    /// Per-view resume offset, stored as a dynamic property on the Crawl
    /// node. Missing checkpoints read as zero.
    pub async fn get_checkpoint(&self, crawl_id: &str, key: &str) -> Result<u64, neo4rs::Error> {
        let q = query(
            "MATCH (cr:Crawl {id: $id})
             RETURN coalesce(cr[$prop], 0) AS v",
        )
        .param("id", crawl_id)
        .param("prop", key);
        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            let v: i64 = row.get("v").unwrap_or(0);
            return Ok(v.max(0) as u64);
        }
        Ok(0)
    }

    pub async fn set_checkpoint(
        &self,
        crawl_id: &str,
        key: &str,
        value: u64,
    ) -> Result<(), neo4rs::Error> {
        let patch = Row::new().int(key, value as i64).build();
        let q = query(
            "MATCH (cr:Crawl {id: $id})
             SET cr += $patch,
                 cr.last_updated_at = datetime($ts)",
        )
        .param("id", crawl_id)
        .param("patch", patch)
        .param("ts", format_datetime(&Utc::now()));
        self.client.graph.run(q).await
    }

    // ---- Upserts ----

    /// Merge agents by name. With `mark_profile` the write also stamps
    /// `profile_last_fetched_at`, feeding the staleness query below.
    pub async fn upsert_agents(
        &self,
        agents: &[AgentRecord],
        observed_at: &DateTime<Utc>,
        mark_profile: bool,
    ) -> Result<usize, neo4rs::Error> {
        let rows: Vec<BoltType> = agents
            .iter()
            .filter(|a| a.name.is_some())
            .map(agent_row)
            .collect();

        let written = rows.len();
        let obs = format_datetime(observed_at);
        for batch in rows.chunks(AGENT_BATCH) {
            let q = query(
                "UNWIND $rows AS row
                 MERGE (a:Agent {name: row.name})
                 ON CREATE SET a.first_seen_at = datetime($obs),
                               a.created_at = datetime(coalesce(row.created_at, $obs))
                 SET a.last_seen_at = datetime($obs),
                     a.id = coalesce(row.id, a.id),
                     a.display_name = coalesce(row.display_name, a.display_name),
                     a.description = coalesce(row.description, a.description),
                     a.avatar_url = coalesce(row.avatar_url, a.avatar_url),
                     a.status = coalesce(row.status, a.status),
                     a.is_claimed = coalesce(row.is_claimed, a.is_claimed),
                     a.is_active = coalesce(row.is_active, a.is_active),
                     a.karma = coalesce(row.karma, a.karma),
                     a.follower_count = coalesce(row.follower_count, a.follower_count),
                     a.following_count = coalesce(row.following_count, a.following_count),
                     a.owner_twitter_id = coalesce(row.owner_twitter_id, a.owner_twitter_id),
                     a.owner_twitter_handle = coalesce(row.owner_twitter_handle, a.owner_twitter_handle),
                     a.claimed_at = CASE WHEN row.claimed_at IS NULL THEN a.claimed_at ELSE datetime(row.claimed_at) END,
                     a.last_active = CASE WHEN row.last_active IS NULL THEN a.last_active ELSE datetime(row.last_active) END,
                     a.updated_at = CASE WHEN row.updated_at IS NULL THEN a.updated_at ELSE datetime(row.updated_at) END,
                     a.profile_last_fetched_at = CASE
                         WHEN $mark_profile THEN datetime($obs)
                         ELSE a.profile_last_fetched_at
                     END",
            )
            .param("rows", batch.to_vec())
            .param("obs", obs.as_str())
            .param("mark_profile", mark_profile);
            self.client.graph.run(q).await?;
        }
        Ok(written)
    }

    pub async fn upsert_submolts(
        &self,
        submolts: &[SubmoltRecord],
        observed_at: &DateTime<Utc>,
    ) -> Result<usize, neo4rs::Error> {
        let rows: Vec<BoltType> = submolts
            .iter()
            .filter(|s| s.name.is_some())
            .map(submolt_row)
            .collect();

        let written = rows.len();
        let obs = format_datetime(observed_at);
        for batch in rows.chunks(SUBMOLT_BATCH) {
            let q = query(
                "UNWIND $rows AS row
                 MERGE (s:Submolt {name: row.name})
                 ON CREATE SET s.first_seen_at = datetime($obs),
                               s.created_at = datetime(coalesce(row.created_at, $obs))
                 SET s.last_seen_at = datetime($obs),
                     s.id = coalesce(row.id, s.id),
                     s.display_name = coalesce(row.display_name, s.display_name),
                     s.description = coalesce(row.description, s.description),
                     s.avatar_url = coalesce(row.avatar_url, s.avatar_url),
                     s.banner_url = coalesce(row.banner_url, s.banner_url),
                     s.banner_color = coalesce(row.banner_color, s.banner_color),
                     s.theme_color = coalesce(row.theme_color, s.theme_color),
                     s.subscriber_count = coalesce(row.subscriber_count, s.subscriber_count),
                     s.post_count = coalesce(row.post_count, s.post_count),
                     s.updated_at = CASE WHEN row.updated_at IS NULL THEN s.updated_at ELSE datetime(row.updated_at) END",
            )
            .param("rows", batch.to_vec())
            .param("obs", obs.as_str());
            self.client.graph.run(q).await?;
        }
        Ok(written)
    }

    /// Merge posts by id, then wire AUTHORED and IN_SUBMOLT edges.
    ///
    /// Rows missing an id, creation time, author name or submolt name are
    /// dropped; the listing endpoints occasionally emit such stubs and they
    /// cannot be keyed or attributed.
    pub async fn upsert_posts(
        &self,
        posts: &[PostRecord],
        observed_at: &DateTime<Utc>,
    ) -> Result<usize, neo4rs::Error> {
        let rows: Vec<BoltType> = posts
            .iter()
            .filter(|p| {
                p.id.is_some()
                    && p.created_at.is_some()
                    && p.author_name().is_some()
                    && p.submolt_name().is_some()
            })
            .map(post_row)
            .collect();

        let written = rows.len();
        let obs = format_datetime(observed_at);
        for batch in rows.chunks(POST_BATCH) {
            let q_nodes = query(
                "UNWIND $rows AS row
                 MERGE (p:Post {id: row.id})
                 ON CREATE SET p.first_seen_at = datetime($obs),
                               p.created_at = CASE WHEN row.created_at IS NULL THEN datetime($obs) ELSE datetime(row.created_at) END
                 SET p.last_seen_at = datetime($obs),
                     p.title = coalesce(row.title, p.title),
                     p.content = coalesce(row.content, p.content),
                     p.url = coalesce(row.url, p.url),
                     p.submolt = coalesce(row.submolt, p.submolt),
                     p.type = coalesce(row.type, p.type),
                     p.score = coalesce(row.score, p.score),
                     p.upvotes = coalesce(row.upvotes, p.upvotes),
                     p.downvotes = coalesce(row.downvotes, p.downvotes),
                     p.comment_count = coalesce(row.comment_count, p.comment_count),
                     p.hot_score = coalesce(row.hot_score, p.hot_score),
                     p.is_pinned = coalesce(row.is_pinned, p.is_pinned),
                     p.is_locked = coalesce(row.is_locked, p.is_locked),
                     p.is_deleted = coalesce(row.is_deleted, p.is_deleted),
                     p.submolt_id = coalesce(row.submolt_id, p.submolt_id),
                     p.updated_at = CASE WHEN row.updated_at IS NULL THEN p.updated_at ELSE datetime(row.updated_at) END",
            )
            .param("rows", batch.to_vec())
            .param("obs", obs.as_str());
            self.client.graph.run(q_nodes).await?;

            let q_rels = query(
                "UNWIND $rows AS row
                 MERGE (a:Agent {name: row.author_name})
                 ON CREATE SET a.first_seen_at = datetime($obs)
                 SET a.last_seen_at = datetime($obs),
                     a.id = coalesce(row.author_id, a.id),
                     a.display_name = coalesce(row.author_display_name, a.display_name),
                     a.description = coalesce(row.author_description, a.description),
                     a.avatar_url = coalesce(row.author_avatar_url, a.avatar_url),
                     a.karma = coalesce(row.author_karma, a.karma),
                     a.follower_count = coalesce(row.author_follower_count, a.follower_count),
                     a.following_count = coalesce(row.author_following_count, a.following_count),
                     a.is_claimed = coalesce(row.author_is_claimed, a.is_claimed),
                     a.is_active = coalesce(row.author_is_active, a.is_active),
                     a.created_at = CASE WHEN row.author_created_at IS NULL THEN a.created_at ELSE datetime(row.author_created_at) END,
                     a.last_active = CASE WHEN row.author_last_active IS NULL THEN a.last_active ELSE datetime(row.author_last_active) END

                 WITH row, a
                 MERGE (s:Submolt {name: row.submolt})
                 ON CREATE SET s.first_seen_at = datetime($obs)
                 SET s.last_seen_at = datetime($obs)

                 WITH row, a, s
                 MATCH (p:Post {id: row.id})
                 MERGE (a)-[r1:AUTHORED]->(p)
                 ON CREATE SET r1.first_seen_at = datetime($obs), r1.created_at = p.created_at
                 SET r1.last_seen_at = datetime($obs)

                 MERGE (p)-[r2:IN_SUBMOLT]->(s)
                 ON CREATE SET r2.first_seen_at = datetime($obs), r2.created_at = p.created_at
                 SET r2.last_seen_at = datetime($obs)",
            )
            .param("rows", batch.to_vec())
            .param("obs", obs.as_str());
            self.client.graph.run(q_rels).await?;
        }
        Ok(written)
    }

    /// Flatten a reply tree and merge every comment with its AUTHORED,
    /// ON_POST and REPLY_TO edges. Flattening is preorder, so a reply's
    /// parent lands in the same or an earlier batch and the REPLY_TO match
    /// always finds it.
    pub async fn upsert_comments(
        &self,
        post_id: &str,
        tree: &[CommentRecord],
        observed_at: &DateTime<Utc>,
    ) -> Result<usize, neo4rs::Error> {
        let flat = flatten_comments(tree, post_id);
        let rows: Vec<BoltType> = flat
            .iter()
            .filter(|c| c.id.is_some() && c.created_at.is_some() && c.author_name().is_some())
            .map(comment_row)
            .collect();

        let written = rows.len();
        let obs = format_datetime(observed_at);
        for batch in rows.chunks(COMMENT_BATCH) {
            let q_nodes = query(
                "UNWIND $rows AS row
                 MERGE (c:Comment {id: row.id})
                 ON CREATE SET c.first_seen_at = datetime($obs),
                               c.created_at = datetime(row.created_at)
                 SET c.last_seen_at = datetime($obs),
                     c.content = coalesce(row.content, c.content),
                     c.score = coalesce(row.score, c.score),
                     c.upvotes = coalesce(row.upvotes, c.upvotes),
                     c.downvotes = coalesce(row.downvotes, c.downvotes),
                     c.reply_count = coalesce(row.reply_count, c.reply_count),
                     c.is_deleted = coalesce(row.is_deleted, c.is_deleted),
                     c.depth = coalesce(row.depth, c.depth),
                     c.updated_at = CASE WHEN row.updated_at IS NULL THEN c.updated_at ELSE datetime(row.updated_at) END",
            )
            .param("rows", batch.to_vec())
            .param("obs", obs.as_str());
            self.client.graph.run(q_nodes).await?;

            let q_rels = query(
                "UNWIND $rows AS row
                 MERGE (a:Agent {name: row.author_name})
                 ON CREATE SET a.first_seen_at = datetime($obs)
                 SET a.last_seen_at = datetime($obs),
                     a.id = coalesce(row.author_id, a.id),
                     a.description = coalesce(row.author_description, a.description),
                     a.avatar_url = coalesce(row.author_avatar_url, a.avatar_url),
                     a.karma = coalesce(row.author_karma, a.karma),
                     a.follower_count = coalesce(row.author_follower_count, a.follower_count),
                     a.following_count = coalesce(row.author_following_count, a.following_count),
                     a.is_claimed = coalesce(row.author_is_claimed, a.is_claimed),
                     a.is_active = coalesce(row.author_is_active, a.is_active),
                     a.created_at = CASE WHEN row.author_created_at IS NULL THEN a.created_at ELSE datetime(row.author_created_at) END,
                     a.last_active = CASE WHEN row.author_last_active IS NULL THEN a.last_active ELSE datetime(row.author_last_active) END

                 WITH row, a
                 MATCH (c:Comment {id: row.id})
                 MATCH (p:Post {id: row.post_id})

                 MERGE (a)-[r1:AUTHORED]->(c)
                 ON CREATE SET r1.first_seen_at = datetime($obs), r1.created_at = c.created_at
                 SET r1.last_seen_at = datetime($obs)

                 MERGE (c)-[r2:ON_POST]->(p)
                 ON CREATE SET r2.first_seen_at = datetime($obs), r2.created_at = c.created_at
                 SET r2.last_seen_at = datetime($obs)

                 WITH row, c
                 WHERE row.parent_id IS NOT NULL
                 MATCH (parent:Comment {id: row.parent_id})
                 MERGE (c)-[r3:REPLY_TO]->(parent)
                 ON CREATE SET r3.first_seen_at = datetime($obs), r3.created_at = c.created_at
                 SET r3.last_seen_at = datetime($obs)",
            )
            .param("rows", batch.to_vec())
            .param("obs", obs.as_str());
            self.client.graph.run(q_rels).await?;
        }
        Ok(written)
    }

    // ---- Time-varying edge sets ----

    /// Reconcile the MODERATES edge set for one submolt against a fresh
    /// member list: close open edges whose agent is no longer listed
    /// (`ended_at`, never deletion), then merge every current member and
    /// reopen their edges. Current state is "edges with null ended_at";
    /// history stays reconstructable from the open/close trail.
    pub async fn reconcile_moderators(
        &self,
        submolt: &str,
        entries: &[ModeratorEntry],
        observed_at: &DateTime<Utc>,
    ) -> Result<usize, neo4rs::Error> {
        let mut current: Vec<String> = Vec::new();
        let mut rows: Vec<BoltType> = Vec::new();
        for entry in entries {
            let Some(name) = entry.resolved_name() else {
                continue;
            };
            current.push(name.to_string());
            rows.push(
                Row::new()
                    .str("name", name)
                    .opt_str("display_name", entry.resolved_display_name())
                    .str("role", entry.role.as_deref().unwrap_or("moderator"))
                    .build(),
            );
        }

        let obs = format_datetime(observed_at);
        let q_end_missing = query(
            "MATCH (s:Submolt {name: $submolt})
             OPTIONAL MATCH (a:Agent)-[r:MODERATES]->(s)
             WHERE r.ended_at IS NULL AND NOT a.name IN $current
             SET r.ended_at = datetime($obs), r.last_seen_at = datetime($obs)",
        )
        .param("submolt", submolt)
        .param("current", current.clone())
        .param("obs", obs.as_str());
        self.client.graph.run(q_end_missing).await?;

        let written = rows.len();
        if !rows.is_empty() {
            let q_merge = query(
                "UNWIND $rows AS row
                 MERGE (s:Submolt {name: $submolt})
                 ON CREATE SET s.first_seen_at = datetime($obs)
                 SET s.last_seen_at = datetime($obs)

                 MERGE (a:Agent {name: row.name})
                 ON CREATE SET a.first_seen_at = datetime($obs)
                 SET a.last_seen_at = datetime($obs),
                     a.display_name = coalesce(row.display_name, a.display_name)

                 MERGE (a)-[r:MODERATES]->(s)
                 ON CREATE SET r.first_seen_at = datetime($obs)
                 SET r.last_seen_at = datetime($obs),
                     r.role = coalesce(row.role, r.role),
                     r.ended_at = NULL",
            )
            .param("rows", rows)
            .param("submolt", submolt)
            .param("obs", obs.as_str());
            self.client.graph.run(q_merge).await?;
        }
        Ok(written)
    }

    /// Reconcile SIMILAR_TO edges for one agent, scoped to a discovery
    /// source. Sources are independent: one source's silence never closes
    /// edges asserted by another.
    pub async fn reconcile_similar(
        &self,
        agent: &str,
        similar: &[String],
        source: &str,
        observed_at: &DateTime<Utc>,
    ) -> Result<usize, neo4rs::Error> {
        let mut names: Vec<String> = similar
            .iter()
            .filter(|n| !n.is_empty() && n.as_str() != agent)
            .cloned()
            .collect();
        names.sort();
        names.dedup();

        let obs = format_datetime(observed_at);
        let q_end_missing = query(
            "MATCH (a:Agent {name: $agent})
             OPTIONAL MATCH (a)-[r:SIMILAR_TO {source: $source}]->(b:Agent)
             WHERE r.ended_at IS NULL AND NOT b.name IN $current
             SET r.ended_at = datetime($obs), r.last_seen_at = datetime($obs)",
        )
        .param("agent", agent)
        .param("source", source)
        .param("current", names.clone())
        .param("obs", obs.as_str());
        self.client.graph.run(q_end_missing).await?;

        let written = names.len();
        if !names.is_empty() {
            let rows: Vec<BoltType> = names
                .iter()
                .map(|n| Row::new().str("other", n).build())
                .collect();
            let q_merge = query(
                "UNWIND $rows AS row
                 MERGE (a:Agent {name: $agent})
                 ON CREATE SET a.first_seen_at = datetime($obs)
                 SET a.last_seen_at = datetime($obs)

                 MERGE (b:Agent {name: row.other})
                 ON CREATE SET b.first_seen_at = datetime($obs)
                 SET b.last_seen_at = datetime($obs)

                 MERGE (a)-[r:SIMILAR_TO {source: $source}]->(b)
                 ON CREATE SET r.first_seen_at = datetime($obs)
                 SET r.last_seen_at = datetime($obs),
                     r.ended_at = NULL",
            )
            .param("rows", rows)
            .param("agent", agent)
            .param("source", source)
            .param("obs", obs.as_str());
            self.client.graph.run(q_merge).await?;
        }
        Ok(written)
    }

    /// Link an agent to its human owner's X account.
    pub async fn upsert_x_owner(
        &self,
        agent: &str,
        account: &XAccountRecord,
        observed_at: &DateTime<Utc>,
    ) -> Result<(), neo4rs::Error> {
        if account.handle.is_empty() {
            return Ok(());
        }
        let obs = format_datetime(observed_at);
        let q = query(
            "MATCH (a:Agent {name: $agent})
             MERGE (x:XAccount {handle: $handle})
             ON CREATE SET x.first_seen_at = datetime($obs)
             SET x.last_seen_at = datetime($obs),
                 x.url = coalesce($url, x.url),
                 x.name = coalesce($x_name, x.name),
                 x.avatar_url = coalesce($x_avatar, x.avatar_url),
                 x.bio = coalesce($x_bio, x.bio),
                 x.follower_count = coalesce($x_follower_count, x.follower_count),
                 x.following_count = coalesce($x_following_count, x.following_count),
                 x.is_verified = coalesce($x_verified, x.is_verified)
             MERGE (a)-[r:HAS_OWNER_X]->(x)
             ON CREATE SET r.first_seen_at = datetime($obs)
             SET r.last_seen_at = datetime($obs)",
        )
        .param("agent", agent)
        .param("handle", account.handle.as_str())
        .param("obs", obs.as_str())
        .param("url", opt_str(account.url.as_deref()))
        .param("x_name", opt_str(account.name.as_deref()))
        .param("x_avatar", opt_str(account.avatar_url.as_deref()))
        .param("x_bio", opt_str(account.bio.as_deref()))
        .param("x_follower_count", opt_int(account.follower_count))
        .param("x_following_count", opt_int(account.following_count))
        .param("x_verified", opt_bool(account.is_verified));
        self.client.graph.run(q).await
    }

    /// Record the ranked membership of one feed at one point in time.
    pub async fn write_feed_snapshot(
        &self,
        crawl_id: &str,
        sort: &str,
        posts: &[PostRecord],
        observed_at: &DateTime<Utc>,
    ) -> Result<usize, neo4rs::Error> {
        let snapshot_id = format!("{crawl_id}:{sort}");
        let rows: Vec<BoltType> = posts
            .iter()
            .enumerate()
            .filter(|(_, p)| p.id.is_some())
            .map(|(i, p)| {
                Row::new()
                    .str("id", p.id.as_deref().unwrap_or_default())
                    .opt_str("title", p.title.as_deref())
                    .opt_str("submolt", p.submolt_name())
                    .opt_int("score", p.score)
                    .opt_datetime("created_at", p.created_at.as_ref())
                    .int("rank", (i + 1) as i64)
                    .build()
            })
            .collect();

        let written = rows.len();
        let obs = format_datetime(observed_at);
        let q = query(
            "MERGE (fs:FeedSnapshot {id: $id})
             ON CREATE SET fs.first_seen_at = datetime($obs), fs.observed_at = datetime($obs)
             SET fs.last_seen_at = datetime($obs),
                 fs.sort = $sort

             WITH fs
             UNWIND $rows AS row
             MERGE (p:Post {id: row.id})
             ON CREATE SET p.first_seen_at = datetime($obs),
                           p.created_at = datetime(coalesce(row.created_at, $obs))
             SET p.last_seen_at = datetime($obs),
                 p.title = coalesce(row.title, p.title),
                 p.submolt = coalesce(row.submolt, p.submolt),
                 p.score = coalesce(row.score, p.score)

             MERGE (fs)-[r:CONTAINS]->(p)
             ON CREATE SET r.first_seen_at = datetime($obs)
             SET r.last_seen_at = datetime($obs),
                 r.rank = row.rank",
        )
        .param("id", snapshot_id)
        .param("sort", sort)
        .param("rows", rows)
        .param("obs", obs.as_str());
        self.client.graph.run(q).await?;
        Ok(written)
    }

    /// Agent names whose profile was never fetched or is older than the
    /// staleness window, oldest first.
    pub async fn stale_agent_profiles(
        &self,
        days: i64,
        limit: usize,
    ) -> Result<Vec<String>, neo4rs::Error> {
        let q = query(
            "MATCH (a:Agent)
             WHERE a.name IS NOT NULL
               AND (a.profile_last_fetched_at IS NULL OR
                    a.profile_last_fetched_at < datetime() - duration({days: $days}))
             RETURN a.name AS name
             ORDER BY coalesce(a.profile_last_fetched_at, datetime('1970-01-01T00:00:00Z')) ASC
             LIMIT $limit",
        )
        .param("days", days)
        .param("limit", limit as i64);
        let mut stream = self.client.graph.execute(q).await?;
        let mut names = Vec::new();
        while let Some(row) = stream.next().await? {
            let name: String = row.get("name").unwrap_or_default();
            if !name.is_empty() {
                names.push(name);
            }
        }
        debug!(stale = names.len(), "agents needing profile refresh");
        Ok(names)
    }
}

/// Flatten an arbitrarily deep reply tree into preorder rows, each carrying
/// its immediate parent's id and the owning post's id. An explicit worklist
/// keeps stack usage flat no matter how deep the replies nest.
pub fn flatten_comments(tree: &[CommentRecord], post_id: &str) -> Vec<CommentRecord> {
    let mut flat = Vec::new();
    let mut work: Vec<(CommentRecord, Option<String>)> = tree
        .iter()
        .rev()
        .map(|c| (c.clone(), c.parent_id.clone()))
        .collect();

    while let Some((mut node, parent)) = work.pop() {
        if node.parent_id.is_none() {
            node.parent_id = parent;
        }
        if node.post_id.is_none() {
            node.post_id = Some(post_id.to_string());
        }
        let replies = std::mem::take(&mut node.replies);
        let own_id = node.id.clone();
        for reply in replies.into_iter().rev() {
            work.push((reply, own_id.clone()));
        }
        flat.push(node);
    }
    flat
}

// ---- Row builders ----

fn agent_row(a: &AgentRecord) -> BoltType {
    Row::new()
        .str("name", a.name.as_deref().unwrap_or_default())
        .opt_str("id", a.id.as_deref())
        .opt_str("display_name", a.display_name.as_deref())
        .opt_str("description", a.description.as_deref())
        .opt_str("avatar_url", a.avatar_url.as_deref())
        .opt_str("status", a.status.as_deref())
        .opt_bool("is_claimed", a.is_claimed)
        .opt_bool("is_active", a.is_active)
        .opt_int("karma", a.karma)
        .opt_int("follower_count", a.follower_count)
        .opt_int("following_count", a.following_count)
        .opt_str("owner_twitter_id", a.owner_twitter_id.as_deref())
        .opt_str("owner_twitter_handle", a.owner_twitter_handle.as_deref())
        .opt_datetime("created_at", a.created_at.as_ref())
        .opt_datetime("claimed_at", a.claimed_at.as_ref())
        .opt_datetime("last_active", a.last_active.as_ref())
        .opt_datetime("updated_at", a.updated_at.as_ref())
        .build()
}

fn submolt_row(s: &SubmoltRecord) -> BoltType {
    Row::new()
        .str("name", s.name.as_deref().unwrap_or_default())
        .opt_str("id", s.id.as_deref())
        .opt_str("display_name", s.display_name.as_deref())
        .opt_str("description", s.description.as_deref())
        .opt_str("avatar_url", s.avatar_url.as_deref())
        .opt_str("banner_url", s.banner_url.as_deref())
        .opt_str("banner_color", s.banner_color.as_deref())
        .opt_str("theme_color", s.theme_color.as_deref())
        .opt_int("subscriber_count", s.subscriber_count)
        .opt_int("post_count", s.post_count)
        .opt_datetime("created_at", s.created_at.as_ref())
        .opt_datetime("updated_at", s.updated_at.as_ref())
        .build()
}

fn post_row(p: &PostRecord) -> BoltType {
    let author = p.author.as_ref().and_then(|a| a.record());
    let submolt = p.submolt.as_ref().and_then(|s| s.record());
    Row::new()
        .str("id", p.id.as_deref().unwrap_or_default())
        .opt_str("title", p.title.as_deref())
        .opt_str("content", p.content.as_deref())
        .opt_str("url", p.url.as_deref())
        .opt_str("submolt", p.submolt_name())
        .opt_str("submolt_id", submolt.and_then(|s| s.id.as_deref()))
        .opt_str("type", p.post_type.as_deref())
        .opt_int("score", p.score)
        .opt_int("upvotes", p.upvotes)
        .opt_int("downvotes", p.downvotes)
        .opt_int("comment_count", p.comment_count)
        .opt_float("hot_score", p.hot_score)
        .opt_bool("is_pinned", p.is_pinned)
        .opt_bool("is_locked", p.is_locked)
        .opt_bool("is_deleted", p.is_deleted)
        .opt_datetime("created_at", p.created_at.as_ref())
        .opt_datetime("updated_at", p.updated_at.as_ref())
        .opt_str("author_name", p.author_name())
        .opt_str(
            "author_id",
            author
                .and_then(|a| a.id.as_deref())
                .or(p.author_id.as_deref()),
        )
        .opt_str(
            "author_display_name",
            author.and_then(|a| a.display_name.as_deref()),
        )
        .opt_str(
            "author_description",
            author.and_then(|a| a.description.as_deref()),
        )
        .opt_str(
            "author_avatar_url",
            author.and_then(|a| a.avatar_url.as_deref()),
        )
        .opt_int("author_karma", author.and_then(|a| a.karma))
        .opt_int(
            "author_follower_count",
            author.and_then(|a| a.follower_count),
        )
        .opt_int(
            "author_following_count",
            author.and_then(|a| a.following_count),
        )
        .opt_bool("author_is_claimed", author.and_then(|a| a.is_claimed))
        .opt_bool("author_is_active", author.and_then(|a| a.is_active))
        .opt_datetime(
            "author_created_at",
            author.and_then(|a| a.created_at.as_ref()),
        )
        .opt_datetime(
            "author_last_active",
            author.and_then(|a| a.last_active.as_ref()),
        )
        .build()
}

fn comment_row(c: &CommentRecord) -> BoltType {
    let author = c.author.as_ref().and_then(|a| a.record());
    Row::new()
        .str("id", c.id.as_deref().unwrap_or_default())
        .opt_str("post_id", c.post_id.as_deref())
        .opt_str("parent_id", c.parent_id.as_deref())
        .opt_str("content", c.content.as_deref())
        .opt_int("score", c.score)
        .opt_int("upvotes", c.upvotes)
        .opt_int("downvotes", c.downvotes)
        .opt_int("reply_count", c.reply_count)
        .opt_int("depth", c.depth)
        .opt_bool("is_deleted", c.is_deleted)
        .opt_datetime("created_at", c.created_at.as_ref())
        .opt_datetime("updated_at", c.updated_at.as_ref())
        .opt_str("author_name", c.author_name())
        .opt_str("author_id", author.and_then(|a| a.id.as_deref()))
        .opt_str(
            "author_description",
            author.and_then(|a| a.description.as_deref()),
        )
        .opt_str(
            "author_avatar_url",
            author.and_then(|a| a.avatar_url.as_deref()),
        )
        .opt_int("author_karma", author.and_then(|a| a.karma))
        .opt_int(
            "author_follower_count",
            author.and_then(|a| a.follower_count),
        )
        .opt_int(
            "author_following_count",
            author.and_then(|a| a.following_count),
        )
        .opt_bool("author_is_claimed", author.and_then(|a| a.is_claimed))
        .opt_bool("author_is_active", author.and_then(|a| a.is_active))
        .opt_datetime(
            "author_created_at",
            author.and_then(|a| a.created_at.as_ref()),
        )
        .opt_datetime(
            "author_last_active",
            author.and_then(|a| a.last_active.as_ref()),
        )
        .build()
}

// ---- Scalar optional params ----

fn opt_str(v: Option<&str>) -> BoltType {
    match v {
        Some(s) => BoltType::String(neo4rs::BoltString::from(s)),
        None => BoltType::Null(neo4rs::BoltNull),
    }
}

fn opt_int(v: Option<i64>) -> BoltType {
    match v {
        Some(i) => BoltType::Integer(neo4rs::BoltInteger::new(i)),
        None => BoltType::Null(neo4rs::BoltNull),
    }
}

fn opt_bool(v: Option<bool>) -> BoltType {
    match v {
        Some(b) => BoltType::Boolean(neo4rs::BoltBoolean::new(b)),
        None => BoltType::Null(neo4rs::BoltNull),
    }
}
