//! Graph write tests: records → upsert/reconciliation engine → query the
//! graph → verify idempotence, per-field merge semantics, and the
//! time-varying edge trails.
//!
//! **Requires:** Docker (Neo4j via testcontainers).
//!
//! Run with: cargo test -p moltgraph-crawler --test graph_write_test

use chrono::{Duration, Utc};

use moltgraph_common::{AgentRecord, CommentRecord, ModeratorEntry, PostRecord};
use moltgraph_graph::{query, GraphClient, GraphStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Spin up a fresh Neo4j container and run migrations.
async fn setup() -> (impl std::any::Any, GraphClient) {
    let (container, client) = moltgraph_graph::testutil::neo4j_container().await;
    moltgraph_graph::migrate::migrate(&client)
        .await
        .expect("migration failed");
    (container, client)
}

async fn count(client: &GraphClient, cypher: &str) -> i64 {
    let mut stream = client
        .inner()
        .execute(query(cypher))
        .await
        .expect("count query failed");
    let row = stream
        .next()
        .await
        .expect("count stream failed")
        .expect("count query returned no row");
    row.get("n").unwrap_or(0)
}

fn agent(json: serde_json::Value) -> AgentRecord {
    serde_json::from_value(json).expect("agent record")
}

fn posts(json: serde_json::Value) -> Vec<PostRecord> {
    serde_json::from_value(json).expect("post records")
}

fn comments(json: serde_json::Value) -> Vec<CommentRecord> {
    serde_json::from_value(json).expect("comment records")
}

fn moderators(json: serde_json::Value) -> Vec<ModeratorEntry> {
    serde_json::from_value(json).expect("moderator entries")
}

/// Open (un-ended) MODERATES edges into the given submolt.
async fn open_moderators(client: &GraphClient, submolt: &str) -> Vec<String> {
    let q = query(
        "MATCH (a:Agent)-[r:MODERATES]->(s:Submolt {name: $submolt})
         WHERE r.ended_at IS NULL
         RETURN a.name AS name ORDER BY name",
    )
    .param("submolt", submolt);
    let mut stream = client.inner().execute(q).await.expect("query failed");
    let mut names = Vec::new();
    while let Some(row) = stream.next().await.expect("stream failed") {
        names.push(row.get::<String>("name").expect("name column"));
    }
    names
}

// ===========================================================================
// Test: node upserts are idempotent with per-field last-write-wins
// ===========================================================================

#[tokio::test]
async fn agent_upsert_is_idempotent() {
    let (_container, client) = setup().await;
    let store = GraphStore::new(client.clone());

    let record = agent(serde_json::json!({
        "name": "molty",
        "displayName": "Molty",
        "karma": 41,
        "createdAt": "2025-03-01T00:00:00Z"
    }));

    let t1 = Utc::now() - Duration::minutes(5);
    let t2 = Utc::now();
    for observed_at in [&t1, &t2, &t2] {
        store
            .upsert_agents(std::slice::from_ref(&record), observed_at, false)
            .await
            .expect("upsert failed");
    }

    assert_eq!(count(&client, "MATCH (a:Agent) RETURN count(a) AS n").await, 1);

    let q = query(
        "MATCH (a:Agent {name: 'molty'})
         RETURN a.karma AS karma,
                a.first_seen_at < a.last_seen_at AS advanced",
    );
    let mut stream = client.inner().execute(q).await.expect("query failed");
    let row = stream.next().await.expect("stream").expect("row");
    assert_eq!(row.get::<i64>("karma").unwrap(), 41);
    // first_seen_at stays pinned to the first observation while
    // last_seen_at advances with each one.
    assert!(row.get::<bool>("advanced").unwrap());
}

#[tokio::test]
async fn absent_fields_never_clobber_stored_values() {
    let (_container, client) = setup().await;
    let store = GraphStore::new(client.clone());
    let now = Utc::now();

    store
        .upsert_agents(
            &[agent(serde_json::json!({"name": "a", "karma": 5, "description": "bot"}))],
            &now,
            false,
        )
        .await
        .expect("first upsert failed");

    // Second payload drops karma and nulls the description.
    store
        .upsert_agents(
            &[agent(serde_json::json!({"name": "a", "description": null, "status": "active"}))],
            &now,
            false,
        )
        .await
        .expect("second upsert failed");

    let q = query(
        "MATCH (a:Agent {name: 'a'})
         RETURN a.karma AS karma, a.description AS description, a.status AS status",
    );
    let mut stream = client.inner().execute(q).await.expect("query failed");
    let row = stream.next().await.expect("stream").expect("row");
    assert_eq!(row.get::<i64>("karma").unwrap(), 5);
    assert_eq!(row.get::<String>("description").unwrap(), "bot");
    assert_eq!(row.get::<String>("status").unwrap(), "active");
}

// ===========================================================================
// Test: posts wire AUTHORED and IN_SUBMOLT
// ===========================================================================

#[tokio::test]
async fn post_upsert_wires_author_and_submolt() {
    let (_container, client) = setup().await;
    let store = GraphStore::new(client.clone());
    let now = Utc::now();

    let batch = posts(serde_json::json!([
        {
            "id": "p1",
            "title": "hello",
            "created_at": "2026-01-01T10:00:00Z",
            "author": {"name": "alice", "karma": 3},
            "submolt": {"name": "intros", "subscriberCount": 10}
        },
        // Stub without an author: dropped, not an error.
        {"id": "p2", "created_at": "2026-01-01T11:00:00Z", "submolt": "intros"}
    ]));

    let written = store.upsert_posts(&batch, &now).await.expect("upsert failed");
    assert_eq!(written, 1);

    assert_eq!(count(&client, "MATCH (p:Post) RETURN count(p) AS n").await, 1);
    assert_eq!(
        count(
            &client,
            "MATCH (:Agent {name: 'alice'})-[:AUTHORED]->(:Post {id: 'p1'}) RETURN count(*) AS n"
        )
        .await,
        1
    );
    assert_eq!(
        count(
            &client,
            "MATCH (:Post {id: 'p1'})-[:IN_SUBMOLT]->(:Submolt {name: 'intros'}) RETURN count(*) AS n"
        )
        .await,
        1
    );
}

// ===========================================================================
// Test: comment trees flatten into nodes + REPLY_TO trail
// ===========================================================================

#[tokio::test]
async fn comment_tree_persists_with_reply_edges() {
    let (_container, client) = setup().await;
    let store = GraphStore::new(client.clone());
    let now = Utc::now();

    store
        .upsert_posts(
            &posts(serde_json::json!([{
                "id": "p1",
                "created_at": "2026-01-01T10:00:00Z",
                "author": "op",
                "submolt": "general"
            }])),
            &now,
        )
        .await
        .expect("post upsert failed");

    let tree = comments(serde_json::json!([
        {"id": "c1", "content": "root", "created_at": "2026-01-01T10:05:00Z",
         "author": "alice", "replies": [
            {"id": "c2", "content": "reply", "created_at": "2026-01-01T10:06:00Z",
             "author": "bob", "replies": [
                {"id": "c3", "content": "deep", "created_at": "2026-01-01T10:07:00Z",
                 "author": "carol"}
            ]}
        ]}
    ]));

    let written = store
        .upsert_comments("p1", &tree, &now)
        .await
        .expect("comment upsert failed");
    assert_eq!(written, 3);

    assert_eq!(count(&client, "MATCH (c:Comment) RETURN count(c) AS n").await, 3);
    assert_eq!(
        count(&client, "MATCH (:Comment)-[:ON_POST]->(:Post {id: 'p1'}) RETURN count(*) AS n").await,
        3
    );
    assert_eq!(
        count(
            &client,
            "MATCH (:Comment {id: 'c2'})-[:REPLY_TO]->(:Comment {id: 'c1'}) RETURN count(*) AS n"
        )
        .await,
        1
    );
    assert_eq!(
        count(
            &client,
            "MATCH (:Comment {id: 'c3'})-[:REPLY_TO]->(:Comment {id: 'c2'}) RETURN count(*) AS n"
        )
        .await,
        1
    );
    // Re-ingesting the same tree changes nothing.
    store
        .upsert_comments("p1", &tree, &now)
        .await
        .expect("second comment upsert failed");
    assert_eq!(count(&client, "MATCH (c:Comment) RETURN count(c) AS n").await, 3);
    assert_eq!(
        count(&client, "MATCH ()-[r:REPLY_TO]->() RETURN count(r) AS n").await,
        2
    );
}

// ===========================================================================
// Test: MODERATES reconciliation closes and reopens membership
// ===========================================================================

#[tokio::test]
async fn moderates_edges_close_and_reopen() {
    let (_container, client) = setup().await;
    let store = GraphStore::new(client.clone());
    let now = Utc::now();

    let first = moderators(serde_json::json!([
        {"name": "a"}, {"agent": {"name": "b"}}
    ]));
    store
        .reconcile_moderators("s", &first, &now)
        .await
        .expect("first reconcile failed");
    assert_eq!(open_moderators(&client, "s").await, vec!["a", "b"]);

    let second = moderators(serde_json::json!([
        {"name": "b"}, {"name": "c"}
    ]));
    store
        .reconcile_moderators("s", &second, &now)
        .await
        .expect("second reconcile failed");

    // a closed, b still open, c newly open.
    assert_eq!(open_moderators(&client, "s").await, vec!["b", "c"]);
    assert_eq!(
        count(
            &client,
            "MATCH (:Agent {name: 'a'})-[r:MODERATES]->(:Submolt {name: 's'})
             WHERE r.ended_at IS NOT NULL RETURN count(r) AS n"
        )
        .await,
        1
    );

    // a re-appears: the same edge reopens rather than duplicating.
    let third = moderators(serde_json::json!([{"name": "a"}, {"name": "b"}, {"name": "c"}]));
    store
        .reconcile_moderators("s", &third, &now)
        .await
        .expect("third reconcile failed");
    assert_eq!(open_moderators(&client, "s").await, vec!["a", "b", "c"]);
    assert_eq!(
        count(&client, "MATCH ()-[r:MODERATES]->() RETURN count(r) AS n").await,
        3
    );
}

// ===========================================================================
// Test: SIMILAR_TO sources are reconciled independently
// ===========================================================================

#[tokio::test]
async fn similar_to_sources_are_independent() {
    let (_container, client) = setup().await;
    let store = GraphStore::new(client.clone());
    let now = Utc::now();

    store
        .reconcile_similar("x", &["y".to_string(), "z".to_string()], "html_profile", &now)
        .await
        .expect("html reconcile failed");
    store
        .reconcile_similar("x", &["y".to_string()], "api_hint", &now)
        .await
        .expect("api reconcile failed");

    // The html_profile source stops asserting z; the api_hint edge to y is untouched.
    store
        .reconcile_similar("x", &["y".to_string()], "html_profile", &now)
        .await
        .expect("second html reconcile failed");

    assert_eq!(
        count(
            &client,
            "MATCH (:Agent {name: 'x'})-[r:SIMILAR_TO {source: 'html_profile'}]->(:Agent)
             WHERE r.ended_at IS NULL RETURN count(r) AS n"
        )
        .await,
        1
    );
    assert_eq!(
        count(
            &client,
            "MATCH (:Agent {name: 'x'})-[r:SIMILAR_TO {source: 'api_hint'}]->(:Agent)
             WHERE r.ended_at IS NULL RETURN count(r) AS n"
        )
        .await,
        1
    );
}

// ===========================================================================
// Test: crawl bookkeeping + checkpoints
// ===========================================================================

#[tokio::test]
async fn checkpoints_persist_and_resume() {
    let (_container, client) = setup().await;
    let store = GraphStore::new(client.clone());
    let cutoff = Utc::now();

    store
        .begin_crawl("full:test", "full", &cutoff)
        .await
        .expect("begin failed");

    assert_eq!(
        store
            .get_checkpoint("full:test", "posts_offset_new_na")
            .await
            .unwrap(),
        0
    );
    store
        .set_checkpoint("full:test", "posts_offset_new_na", 50)
        .await
        .expect("set failed");
    store
        .set_checkpoint("full:test", "posts_offset_new_na", 120)
        .await
        .expect("set failed");
    store
        .set_checkpoint("full:test", "posts_offset_top_week", 30)
        .await
        .expect("set failed");

    assert_eq!(
        store
            .get_checkpoint("full:test", "posts_offset_new_na")
            .await
            .unwrap(),
        120
    );
    assert_eq!(
        store
            .get_checkpoint("full:test", "posts_offset_top_week")
            .await
            .unwrap(),
        30
    );

    let recorded = store
        .latest_cutoff()
        .await
        .expect("cutoff query failed")
        .expect("cutoff missing");
    assert!((recorded - cutoff).num_seconds().abs() < 2);

    store.end_crawl("full:test").await.expect("end failed");
    assert_eq!(
        count(
            &client,
            "MATCH (cr:Crawl {id: 'full:test'}) WHERE cr.ended_at IS NOT NULL RETURN count(cr) AS n"
        )
        .await,
        1
    );
}

// ===========================================================================
// Test: feed snapshots record ranked membership
// ===========================================================================

#[tokio::test]
async fn feed_snapshot_records_ranks() {
    let (_container, client) = setup().await;
    let store = GraphStore::new(client.clone());
    let now = Utc::now();

    let feed = posts(serde_json::json!([
        {"id": "p1", "title": "first", "created_at": "2026-01-01T10:00:00Z", "submolt": "s"},
        {"id": "p2", "title": "second", "created_at": "2026-01-01T09:00:00Z", "submolt": "s"}
    ]));

    store
        .write_feed_snapshot("full:test", "hot", &feed, &now)
        .await
        .expect("snapshot failed");

    let q = query(
        "MATCH (:FeedSnapshot {id: 'full:test:hot'})-[r:CONTAINS]->(p:Post)
         RETURN p.id AS id, r.rank AS rank ORDER BY r.rank",
    );
    let mut stream = client.inner().execute(q).await.expect("query failed");
    let mut ranked = Vec::new();
    while let Some(row) = stream.next().await.expect("stream failed") {
        ranked.push((
            row.get::<String>("id").unwrap(),
            row.get::<i64>("rank").unwrap(),
        ));
    }
    assert_eq!(ranked, vec![("p1".to_string(), 1), ("p2".to_string(), 2)]);
}
