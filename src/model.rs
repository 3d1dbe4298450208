// src/model.rs
//! Data model shared by every pipeline stage.
//!
//! `RawItem` is what a page fetch yields, `CandidateItem` is the classified record
//! the filter/matcher/ranker work on, and `ResultItem` adds presentation fields.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MalformedItem, RunError};

/// A scanned account. `stable_id` (a DID) is filled lazily by the resolver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub handle: String,
    pub display_name: String,
    #[serde(default)]
    pub stable_id: Option<String>,
    #[serde(default)]
    pub priority: bool,
}

impl Source {
    pub fn new(handle: impl Into<String>) -> Self {
        let handle = normalize_handle(&handle.into());
        Self {
            display_name: format!("@{handle}"),
            handle,
            stable_id: None,
            priority: false,
        }
    }

    pub fn with_stable_id(mut self, did: impl Into<String>) -> Self {
        self.stable_id = Some(did.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn prioritized(mut self) -> Self {
        self.priority = true;
        self
    }
}

/// Trim and drop a leading `@`.
pub fn normalize_handle(raw: &str) -> String {
    raw.trim().trim_start_matches('@').trim().to_string()
}

/// Identity of a post author (or of the account that reposted it).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

/// The post embedded by a quote.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotedPost {
    pub uri: Option<String>,
    pub text: String,
}

/// An item exactly as fetched from one page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawItem {
    pub uri: Option<String>,
    pub author: Option<Author>,
    /// Record creation time (primary).
    pub created_at: Option<String>,
    /// AppView index time (fallback).
    pub indexed_at: Option<String>,
    pub text: String,
    pub like_count: u64,
    pub repost_count: u64,
    pub reply_count: u64,
    /// URI of the parent post when this item is a reply.
    pub reply_parent: Option<String>,
    pub quote: Option<QuotedPost>,
    /// Acting account when the feed entry is a repost wrapper.
    pub repost_by: Option<Author>,
    pub media: Vec<String>,
}

impl RawItem {
    /// Creation time, falling back to the index time.
    pub fn timestamp(&self) -> Result<DateTime<Utc>, MalformedItem> {
        let created = self.created_at.as_deref().map(parse_timestamp);
        match created {
            Some(Ok(ts)) => Ok(ts),
            other => match self.indexed_at.as_deref().map(parse_timestamp) {
                Some(Ok(ts)) => Ok(ts),
                _ => match other {
                    Some(Err(e)) => Err(e),
                    _ => Err(MalformedItem::MissingTimestamp),
                },
            },
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, MalformedItem> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| MalformedItem::UnparsableTimestamp(raw.to_string()))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Original,
    Reply,
    Quote,
    Repost,
}

/// A classified item, ready for filtering and ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateItem {
    /// Unique per feed entry: the post URI, suffixed with the reposter for reposts.
    pub stable_id: String,
    pub uri: String,
    pub author_did: String,
    pub author_handle: String,
    pub author_display_name: String,
    pub author_avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub kind: ItemKind,
    pub text: String,
    pub quoted_text: Option<String>,
    pub reposted_by: Option<String>,
    pub like_count: u64,
    pub repost_count: u64,
    pub reply_count: u64,
    pub permalink: String,
    pub first_media: Option<String>,
    pub is_priority: bool,
}

impl CandidateItem {
    pub fn from_raw(raw: RawItem, kind: ItemKind, is_priority: bool) -> Result<Self, MalformedItem> {
        let created_at = raw.timestamp()?;
        let uri = raw
            .uri
            .filter(|u| !u.trim().is_empty())
            .ok_or(MalformedItem::MissingField("uri"))?;
        let author = raw
            .author
            .filter(|a| !a.did.is_empty())
            .ok_or(MalformedItem::MissingField("author"))?;

        let stable_id = match &raw.repost_by {
            Some(by) => format!("{uri}#repost:{}", by.did),
            None => uri.clone(),
        };
        let permalink = permalink_for(&author.did, &uri);
        let author_display_name = author
            .display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| author.handle.clone());

        Ok(Self {
            stable_id,
            permalink,
            uri,
            author_display_name,
            author_did: author.did,
            author_handle: author.handle,
            author_avatar: author.avatar.filter(|a| !a.is_empty()),
            created_at,
            kind,
            text: raw.text,
            quoted_text: raw.quote.map(|q| q.text),
            reposted_by: raw.repost_by.map(|by| by.handle),
            like_count: raw.like_count,
            repost_count: raw.repost_count,
            reply_count: raw.reply_count,
            first_media: raw.media.into_iter().next(),
            is_priority,
        })
    }

    /// Likes plus reposts.
    pub fn engagement(&self) -> u64 {
        self.like_count.saturating_add(self.repost_count)
    }
}

/// `at://did/app.bsky.feed.post/rkey` → `https://bsky.app/profile/did/post/rkey`.
pub fn permalink_for(did: &str, uri: &str) -> String {
    let rkey = uri.rsplit('/').next().unwrap_or_default();
    format!("https://bsky.app/profile/{did}/post/{rkey}")
}

/// Oldest admissible creation time, fixed once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub window_start: DateTime<Utc>,
}

impl FetchWindow {
    /// Errors when `now - window_hours` leaves the representable date range.
    pub fn from_lookback(now: DateTime<Utc>, window_hours: u32) -> Result<Self, RunError> {
        now.checked_sub_signed(Duration::hours(i64::from(window_hours)))
            .map(|window_start| Self { window_start })
            .ok_or_else(|| RunError::config(format!("window of {window_hours}h is out of range")))
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.window_start
    }
}

/// A ranked item plus presentation-only fields.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    #[serde(flatten)]
    pub item: CandidateItem,
    /// Public link with tracking parameter.
    pub url: String,
    pub ts_local: String,
    pub html: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub items: Vec<ResultItem>,
    pub scanned_source_count: usize,
    pub elapsed_ms: u64,
}
