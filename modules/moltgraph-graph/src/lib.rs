pub mod client;
pub mod migrate;
mod rows;
pub mod store;
#[cfg(feature = "test-utils")]
pub mod testutil;

pub use client::GraphClient;
pub use store::{flatten_comments, GraphStore};

// Re-exported so integration tests can run ad-hoc cypher against the same driver.
pub use neo4rs::query;
