// Checkpointed pagination driver for one view.
//
// The posts endpoint lies in several distinct ways: a CDN layer sometimes
// serves the identical page regardless of offset, the server sometimes
// ignores the offset parameter while varying cosmetic ordering, and the
// declared next-offset can be absent, non-numeric, or non-increasing. The
// scanner detects each failure mode and stops instead of looping; the
// checkpoint written after every processed page makes a kill-and-restart
// lose at most the in-flight page.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use moltbook_client::ClientError;
use moltgraph_common::{PostPage, PostRecord};

use crate::views::View;

/// Leading item ids forming a page's identity signature.
const SIGNATURE_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub page_size: u32,
    /// 0 = unbounded.
    pub max_pages: u32,
    pub max_stale_pages: u32,
    pub max_repeat_pages: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_pages: 0,
            max_stale_pages: 4,
            max_repeat_pages: 2,
        }
    }
}

/// Why a view stopped. All terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Empty batch, or the server declared no further pages.
    Exhausted,
    /// The identical page signature came back too many times in a row.
    RepeatDetected,
    /// Pages kept arriving but contained nothing previously unseen.
    StaleDetected,
    PageCapReached,
    /// Incremental scan crossed the cutoff boundary.
    CutoffReached,
}

#[derive(Debug)]
pub struct ViewScan {
    pub stop: StopReason,
    pub pages: u32,
    pub new_ids: usize,
    pub offset: u64,
}

/// Fetches one page of a view. The production impl wraps the API client;
/// tests script it.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, view: &View, offset: u64, limit: u32) -> Result<PostPage, ClientError>;
}

pub struct PageOutcome {
    /// Ids in this batch the run had not seen before, the scanner's
    /// staleness signal.
    pub new_ids: usize,
}

/// Consumes fetched batches and persists the advanced checkpoint.
/// `save_offset` is only called after `page` succeeds, so a crash never
/// checkpoints past unprocessed work.
#[async_trait]
pub trait PageSink: Send {
    async fn page(&mut self, view: &View, posts: &[PostRecord]) -> Result<PageOutcome>;
    async fn save_offset(&mut self, view: &View, offset: u64) -> Result<()>;
}

pub struct ViewScanner {
    cfg: ScanConfig,
    cutoff: Option<DateTime<Utc>>,
}

impl ViewScanner {
    pub fn new(cfg: ScanConfig) -> Self {
        Self { cfg, cutoff: None }
    }

    /// Bound the scan to items newer than `cutoff`. Only applied to
    /// chronological views; other sorts are scanned unfiltered.
    pub fn with_cutoff(mut self, cutoff: Option<DateTime<Utc>>) -> Self {
        self.cutoff = cutoff;
        self
    }

    pub async fn scan(
        &self,
        source: &dyn PageSource,
        sink: &mut dyn PageSink,
        view: &View,
        start_offset: u64,
    ) -> Result<ViewScan> {
        let cutoff = self.cutoff.filter(|_| view.is_chronological());

        let mut offset = start_offset;
        let mut prev_sig: Option<Vec<String>> = None;
        let mut repeat_pages = 0u32;
        let mut stale_pages = 0u32;
        let mut pages = 0u32;
        let mut total_new = 0usize;

        info!(
            view = %view.label(),
            offset,
            page_size = self.cfg.page_size,
            "scanning view"
        );

        let stop = loop {
            let page = source
                .fetch(view, offset, self.cfg.page_size)
                .await
                .with_context(|| format!("page fetch failed for view {}", view.label()))?;

            if page.posts.is_empty() {
                break StopReason::Exhausted;
            }

            let sig = signature(&page.posts);
            if prev_sig.as_ref() == Some(&sig) {
                repeat_pages += 1;
            } else {
                repeat_pages = 0;
            }
            prev_sig = Some(sig);

            // Cutoff filter: keep strictly-newer items; a page with nothing
            // newer means the chronological stream has crossed the boundary.
            let (kept, crossed_cutoff) = match cutoff {
                Some(t) => {
                    let kept: Vec<PostRecord> = page
                        .posts
                        .iter()
                        .filter(|p| p.created_at.map(|c| c > t).unwrap_or(false))
                        .cloned()
                        .collect();
                    let crossed = kept.is_empty();
                    (kept, crossed)
                }
                None => (page.posts.clone(), false),
            };

            let outcome = sink.page(view, &kept).await?;
            total_new += outcome.new_ids;

            let old_offset = offset;
            offset = advance_offset(offset, page.posts.len(), page.next_offset);
            sink.save_offset(view, offset).await?;
            pages += 1;

            if outcome.new_ids == 0 {
                stale_pages += 1;
            } else {
                stale_pages = 0;
            }

            info!(
                view = %view.label(),
                batch = page.posts.len(),
                kept = kept.len(),
                new_ids = outcome.new_ids,
                has_more = page.has_more,
                offset_from = old_offset,
                offset_to = offset,
                "processed page"
            );

            if crossed_cutoff {
                break StopReason::CutoffReached;
            }
            if self.cfg.max_pages > 0 && pages >= self.cfg.max_pages {
                break StopReason::PageCapReached;
            }
            if repeat_pages >= self.cfg.max_repeat_pages {
                warn!(
                    view = %view.label(),
                    "same page signature repeating; stopping view"
                );
                break StopReason::RepeatDetected;
            }
            if stale_pages >= self.cfg.max_stale_pages {
                warn!(
                    view = %view.label(),
                    "no new ids for several pages (offset likely ignored); stopping view"
                );
                break StopReason::StaleDetected;
            }
            if !page.has_more {
                break StopReason::Exhausted;
            }
        };

        info!(
            view = %view.label(),
            ?stop,
            pages,
            new_ids = total_new,
            "view stopped"
        );

        Ok(ViewScan {
            stop,
            pages,
            new_ids: total_new,
            offset,
        })
    }
}

fn signature(posts: &[PostRecord]) -> Vec<String> {
    posts
        .iter()
        .take(SIGNATURE_LEN)
        .filter_map(|p| p.id.clone())
        .collect()
}

/// Prefer the server-declared next offset when it actually advances;
/// otherwise step by the batch length. Degrades gracefully when the
/// declared offset is absent, non-numeric, or non-increasing.
fn advance_offset(offset: u64, batch_len: usize, declared: Option<i64>) -> u64 {
    match declared {
        Some(next) if next > offset as i64 => next as u64,
        _ => offset + batch_len as u64,
    }
}
