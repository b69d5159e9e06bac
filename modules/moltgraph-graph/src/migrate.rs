use neo4rs::query;
use tracing::info;

use crate::GraphClient;

/// Run idempotent schema migrations: one uniqueness constraint per natural
/// key. `IF NOT EXISTS` makes reruns cheap; "already exists" errors from
/// older servers are ignored.
pub async fn migrate(client: &GraphClient) -> Result<(), neo4rs::Error> {
    let g = &client.graph;

    info!("Running schema migrations...");

    let constraints = [
        "CREATE CONSTRAINT agent_name IF NOT EXISTS FOR (n:Agent) REQUIRE n.name IS UNIQUE",
        "CREATE CONSTRAINT submolt_name IF NOT EXISTS FOR (n:Submolt) REQUIRE n.name IS UNIQUE",
        "CREATE CONSTRAINT post_id IF NOT EXISTS FOR (n:Post) REQUIRE n.id IS UNIQUE",
        "CREATE CONSTRAINT comment_id IF NOT EXISTS FOR (n:Comment) REQUIRE n.id IS UNIQUE",
        "CREATE CONSTRAINT xaccount_handle IF NOT EXISTS FOR (n:XAccount) REQUIRE n.handle IS UNIQUE",
        "CREATE CONSTRAINT crawl_id IF NOT EXISTS FOR (n:Crawl) REQUIRE n.id IS UNIQUE",
        "CREATE CONSTRAINT feed_snapshot_id IF NOT EXISTS FOR (n:FeedSnapshot) REQUIRE n.id IS UNIQUE",
    ];

    for c in &constraints {
        run_ignoring_exists(g, c).await?;
    }
    info!("Uniqueness constraints in place");

    Ok(())
}

async fn run_ignoring_exists(g: &neo4rs::Graph, stmt: &str) -> Result<(), neo4rs::Error> {
    match g.run(query(stmt)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("already exists") || msg.contains("EquivalentSchemaRule") {
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}
