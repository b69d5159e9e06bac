// Derives referenced entities from fetched batches: submolt identities,
// post/comment authors, moderator agents. Output feeds the enrichment
// stages (profile fetches, moderator refreshes) later in the run.

use std::collections::{HashMap, HashSet};

use moltgraph_common::{
    AgentRecord, CommentRecord, ModeratorEntry, SubmoltRecord, SubmoltRef,
};

/// Accumulates the richest representation seen for each submolt name across
/// a whole run. Posts embed anything from a bare name to a full object;
/// later sightings fill in fields but never erase them.
#[derive(Default)]
pub struct SubmoltCatalog {
    order: Vec<String>,
    seen: HashMap<String, SubmoltRecord>,
}

impl SubmoltCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, submolt: &SubmoltRef) {
        let Some(name) = submolt.name() else {
            return;
        };
        let entry = self.entry(name);
        if let Some(record) = submolt.record() {
            entry.absorb(record);
        }
    }

    pub fn observe_record(&mut self, record: &SubmoltRecord) {
        let Some(name) = record.name.clone() else {
            return;
        };
        self.entry(&name).absorb(record);
    }

    fn entry(&mut self, name: &str) -> &mut SubmoltRecord {
        if !self.seen.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.seen
            .entry(name.to_string())
            .or_insert_with(|| SubmoltRecord::named(name))
    }

    /// Names in first-seen order, so bounded enrichment stages work through
    /// the most prominent submolts first.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn records(&self) -> Vec<SubmoltRecord> {
        self.order
            .iter()
            .filter_map(|name| self.seen.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Collect every author name across an arbitrarily deep reply tree.
/// Explicit worklist; reply depth never grows the stack.
pub fn collect_comment_authors(tree: &[CommentRecord], out: &mut HashSet<String>) {
    let mut work: Vec<&CommentRecord> = tree.iter().collect();
    while let Some(comment) = work.pop() {
        if let Some(name) = comment.author_name() {
            out.insert(name.to_string());
        }
        work.extend(comment.replies.iter());
    }
}

/// Agent records worth upserting from a moderator listing: the embedded
/// profile when the wrapper carries one, a name-only record otherwise.
pub fn moderator_agents(entries: &[ModeratorEntry]) -> Vec<AgentRecord> {
    entries.iter().filter_map(|e| e.agent_record()).collect()
}
