// src/config/run.rs
//! `RunConfig`: every knob of one invocation, built once and passed by reference.

use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::RunError;

pub const MAX_LIMIT: usize = 200;
pub const MAX_PAGE_SIZE: u32 = 100;
/// One year.
pub const MAX_WINDOW_HOURS: u32 = 24 * 365;

/// Ranking metric.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Reposts,
    Likes,
    Total,
    #[default]
    Recency,
}

impl FromStr for SortKey {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reposts" => Ok(SortKey::Reposts),
            "likes" => Ok(SortKey::Likes),
            "total" => Ok(SortKey::Total),
            "recency" | "recent" => Ok(SortKey::Recency),
            other => Err(RunError::config(format!("unknown sort key `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Query tokens, OR-ed. Empty matches everything.
    pub tokens: Vec<String>,
    pub window_hours: u32,
    pub min_reposts: u64,
    pub min_likes: u64,
    pub limit: usize,
    pub sort_key: SortKey,
    pub include_replies: bool,
    pub include_quotes: bool,
    pub include_reposts: bool,
    pub match_in_urls: bool,
    pub match_in_quoted_text: bool,
    pub concurrency_limit: usize,
    pub global_deadline_ms: u64,
    pub per_request_timeout_ms: u64,
    /// Rotation subset size.
    pub max_sources: usize,
    pub priority_first: bool,
    /// IANA zone used for rotation and display only.
    pub time_zone: String,
    pub page_size: u32,
    /// Walkers stop once the run has fetched this many times `limit` raw items.
    pub raw_headroom_factor: usize,
    /// Hard cap on pages per walker.
    pub max_pages: usize,
    pub utm_source: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            window_hours: 7 * 24,
            min_reposts: 0,
            min_likes: 0,
            limit: 40,
            sort_key: SortKey::Recency,
            include_replies: true,
            include_quotes: true,
            include_reposts: true,
            match_in_urls: false,
            match_in_quoted_text: false,
            concurrency_limit: 6,
            global_deadline_ms: 8_000,
            per_request_timeout_ms: 1_500,
            max_sources: 40,
            priority_first: false,
            time_zone: "America/New_York".to_string(),
            page_size: 50,
            raw_headroom_factor: 2,
            max_pages: 20,
            utm_source: Some("hoopshype".to_string()),
        }
    }
}

impl RunConfig {
    /// Check every field and return the parsed reference zone.
    pub fn validate(&self) -> Result<Tz, RunError> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(RunError::config(format!(
                "limit must be within 1..={MAX_LIMIT}, got {}",
                self.limit
            )));
        }
        if !(1..=MAX_WINDOW_HOURS).contains(&self.window_hours) {
            return Err(RunError::config(format!(
                "window_hours must be within 1..={MAX_WINDOW_HOURS}, got {}",
                self.window_hours
            )));
        }
        if self.concurrency_limit == 0 {
            return Err(RunError::config("concurrency_limit must be at least 1"));
        }
        if self.max_sources == 0 {
            return Err(RunError::config("max_sources must be at least 1"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(RunError::config(format!(
                "page_size must be within 1..={MAX_PAGE_SIZE}"
            )));
        }
        if self.global_deadline_ms == 0 {
            return Err(RunError::config("global_deadline_ms must be positive"));
        }
        if self.per_request_timeout_ms == 0
            || self.per_request_timeout_ms > self.global_deadline_ms
        {
            return Err(RunError::config(
                "per_request_timeout_ms must be positive and not exceed global_deadline_ms",
            ));
        }
        if self.raw_headroom_factor == 0 {
            return Err(RunError::config("raw_headroom_factor must be at least 1"));
        }
        if self.max_pages == 0 {
            return Err(RunError::config("max_pages must be at least 1"));
        }
        self.time_zone
            .parse::<Tz>()
            .map_err(|_| RunError::config(format!("unknown time zone `{}`", self.time_zone)))
    }

    pub fn global_deadline(&self) -> Duration {
        Duration::from_millis(self.global_deadline_ms)
    }

    pub fn per_request_timeout(&self) -> Duration {
        Duration::from_millis(self.per_request_timeout_ms)
    }

    /// Raw items the whole run may accumulate before walkers stop paging.
    pub fn raw_item_budget(&self) -> usize {
        self.limit.saturating_mul(self.raw_headroom_factor)
    }

    /// Split a `a|b|c` query string into trimmed, non-empty tokens.
    pub fn parse_tokens(raw: &str) -> Vec<String> {
        raw.split('|')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}
