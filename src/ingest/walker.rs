// src/ingest/walker.rs
//! Cursor walker for one source or one search query.
//!
//! Before every page: stop if the global deadline passed, if the run's raw-item
//! budget is spent, or if the page cap is hit. After every page: stop if the
//! cursor is missing or did not advance, or if the page already reached items
//! older than the window (feeds are newest-first). Author feeds order reposts by
//! repost time, so they never trigger the cutoff. A request exceeding its own
//! timeout ends the walk for this target only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::error::FetchError;
use crate::ingest::pool::Deadline;
use crate::ingest::types::{FeedClient, FetchTarget};
use crate::model::RawItem;

/// Raw items fetched across the whole run, shared by every walker.
#[derive(Debug)]
pub struct RawBudget {
    fetched: AtomicUsize,
    cap: usize,
}

impl RawBudget {
    pub fn new(cap: usize) -> Self {
        Self {
            fetched: AtomicUsize::new(0),
            cap,
        }
    }

    pub fn add(&self, n: usize) {
        self.fetched.fetch_add(n, Ordering::Relaxed);
    }

    pub fn fetched(&self) -> usize {
        self.fetched.load(Ordering::Relaxed)
    }

    /// True once the run has fetched more than the cap.
    pub fn exhausted(&self) -> bool {
        self.fetched() > self.cap
    }
}

/// Why a walk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEnd {
    Exhausted,
    Deadline,
    Budget,
    Cutoff,
    PageCap,
    StalledCursor,
    Timeout,
    Upstream(FetchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkSummary {
    pub pages: usize,
    pub items: usize,
    pub end: WalkEnd,
}

impl WalkSummary {
    /// The very first request failed upstream; nothing was fetched.
    pub fn failed_upstream(&self) -> bool {
        self.pages == 0 && matches!(self.end, WalkEnd::Upstream(_))
    }
}

pub struct PageWalker<'a> {
    pub feed: &'a dyn FeedClient,
    pub target: &'a FetchTarget,
    pub page_size: u32,
    pub request_timeout: Duration,
    pub max_pages: usize,
    pub deadline: Deadline,
    pub budget: &'a RawBudget,
    pub window_start: DateTime<Utc>,
}

impl PageWalker<'_> {
    /// Walk pages, handing each page's items to `on_page` as they arrive.
    pub async fn walk<F>(&self, mut on_page: F) -> WalkSummary
    where
        F: FnMut(Vec<RawItem>),
    {
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        let mut items = 0usize;

        let end = loop {
            if self.deadline.is_expired() {
                break WalkEnd::Deadline;
            }
            if self.budget.exhausted() {
                break WalkEnd::Budget;
            }
            if pages >= self.max_pages {
                break WalkEnd::PageCap;
            }

            let request = self
                .feed
                .fetch_page(self.target, cursor.as_deref(), self.page_size);
            let page = match tokio::time::timeout(self.request_timeout, request).await {
                Err(_) => break self.timed_out(pages),
                Ok(Err(e)) if !e.is_upstream() => break self.timed_out(pages),
                Ok(Err(e)) => {
                    counter!("stream_fetch_errors_total", "kind" => e.kind()).increment(1);
                    tracing::warn!(
                        target: "walker",
                        provider = self.feed.name(),
                        target_id = self.target.label(),
                        page = pages,
                        error = %e,
                        "page fetch failed"
                    );
                    break WalkEnd::Upstream(e);
                }
                Ok(Ok(page)) => page,
            };

            pages += 1;
            counter!("stream_pages_fetched_total").increment(1);
            let n = page.items.len();
            items += n;
            self.budget.add(n);

            let past_cutoff = page
                .items
                .iter()
                .rev()
                .find(|it| it.repost_by.is_none())
                .and_then(|it| it.timestamp().ok())
                .is_some_and(|ts| ts < self.window_start);

            on_page(page.items);

            if n == 0 {
                break WalkEnd::Exhausted;
            }
            if past_cutoff {
                break WalkEnd::Cutoff;
            }
            match page.next_cursor.filter(|c| !c.is_empty()) {
                None => break WalkEnd::Exhausted,
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    break WalkEnd::StalledCursor
                }
                Some(next) => cursor = Some(next),
            }
        };

        tracing::debug!(
            target: "walker",
            target_id = self.target.label(),
            pages,
            items,
            end = ?end,
            "walk finished"
        );
        WalkSummary { pages, items, end }
    }

    fn timed_out(&self, pages: usize) -> WalkEnd {
        counter!("stream_fetch_timeouts_total").increment(1);
        tracing::warn!(
            target: "walker",
            target_id = self.target.label(),
            page = pages,
            timeout_ms = self.request_timeout.as_millis() as u64,
            "page request timed out; treating as end of stream"
        );
        WalkEnd::Timeout
    }
}
