// Test mocks for the scanner seams: a scripted page source and a recording
// sink. No network, no database.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use moltbook_client::ClientError;
use moltgraph_common::{parse_datetime, PostPage, PostRecord};

use crate::scanner::{PageOutcome, PageSink, PageSource};
use crate::views::View;

/// Minimal post with just an id.
pub fn post(id: &str) -> PostRecord {
    PostRecord {
        id: Some(id.to_string()),
        ..PostRecord::default()
    }
}

/// Post with an id and a creation time.
pub fn post_at(id: &str, created_at: &str) -> PostRecord {
    PostRecord {
        id: Some(id.to_string()),
        created_at: parse_datetime(created_at),
        ..PostRecord::default()
    }
}

/// Page of id-only posts.
pub fn page(ids: &[&str], has_more: bool, next_offset: Option<i64>) -> PostPage {
    PostPage {
        posts: ids.iter().map(|id| post(id)).collect(),
        has_more,
        next_offset,
    }
}

/// Serves a scripted sequence of pages in call order, ignoring the offset,
/// exactly how the misbehaving upstream acts. With a fallback page set, the
/// source keeps serving it after the script runs out (the "CDN returns the
/// same page forever" failure mode); without one, running out is an error.
pub struct ScriptedSource {
    script: Mutex<VecDeque<PostPage>>,
    fallback: Option<PostPage>,
}

impl ScriptedSource {
    pub fn new(pages: Vec<PostPage>) -> Self {
        Self {
            script: Mutex::new(pages.into()),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, page: PostPage) -> Self {
        self.fallback = Some(page);
        self
    }

    /// Page wrapping the given posts, with more pages declared.
    pub fn page_of(posts: Vec<PostRecord>) -> PostPage {
        PostPage {
            posts,
            has_more: true,
            next_offset: None,
        }
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch(&self, _view: &View, _offset: u64, _limit: u32) -> Result<PostPage, ClientError> {
        if let Some(page) = self.script.lock().expect("script lock").pop_front() {
            return Ok(page);
        }
        match &self.fallback {
            Some(page) => Ok(page.clone()),
            None => Err(ClientError::Network("scripted source exhausted".to_string())),
        }
    }
}

/// Records every batch and checkpoint the scanner hands over, and tracks
/// which ids the run has seen to compute the staleness signal.
#[derive(Default)]
pub struct RecordingSink {
    pub pages: Vec<Vec<String>>,
    pub offsets: Vec<(String, u64)>,
    pub seen: HashSet<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PageSink for RecordingSink {
    async fn page(&mut self, _view: &View, posts: &[PostRecord]) -> Result<PageOutcome> {
        let ids: Vec<String> = posts.iter().filter_map(|p| p.id.clone()).collect();
        let new_ids = ids
            .iter()
            .filter(|id| self.seen.insert((*id).clone()))
            .count();
        self.pages.push(ids);
        Ok(PageOutcome { new_ids })
    }

    async fn save_offset(&mut self, view: &View, offset: u64) -> Result<()> {
        self.offsets.push((view.checkpoint_key(), offset));
        Ok(())
    }
}
