// src/analyze/filter.rs
//! Freshness, engagement thresholds and per-kind toggles. All rules must pass.

use chrono::{DateTime, Utc};

use crate::config::RunConfig;
use crate::model::{CandidateItem, FetchWindow, ItemKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterConfig {
    pub window_start: DateTime<Utc>,
    pub min_likes: u64,
    pub min_reposts: u64,
    pub include_replies: bool,
    pub include_quotes: bool,
    pub include_reposts: bool,
}

impl FilterConfig {
    pub fn from_run_config(cfg: &RunConfig, window: FetchWindow) -> Self {
        Self {
            window_start: window.window_start,
            min_likes: cfg.min_likes,
            min_reposts: cfg.min_reposts,
            include_replies: cfg.include_replies,
            include_quotes: cfg.include_quotes,
            include_reposts: cfg.include_reposts,
        }
    }

    pub fn keep(&self, item: &CandidateItem) -> bool {
        let kind_allowed = match item.kind {
            ItemKind::Original => true,
            ItemKind::Reply => self.include_replies,
            ItemKind::Quote => self.include_quotes,
            ItemKind::Repost => self.include_reposts,
        };
        kind_allowed
            && item.created_at >= self.window_start
            && item.like_count >= self.min_likes
            && item.repost_count >= self.min_reposts
    }
}
