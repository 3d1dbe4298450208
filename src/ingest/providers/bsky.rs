// src/ingest/providers/bsky.rs
//! Bluesky AppView client: author feeds, post search, and handle resolution.
//!
//! No timeout is set on the HTTP client itself; the walker bounds every page
//! request with the run's per-request timeout.

use async_trait::async_trait;
use metrics::histogram;
use serde::Deserialize;

use crate::error::FetchError;
use crate::ingest::types::{FeedClient, FeedPage, FetchTarget, IdentityLookup};
use crate::model::{Author, QuotedPost, RawItem};

pub const DEFAULT_APPVIEW_BASE: &str = "https://public.api.bsky.app";
pub const USER_AGENT: &str =
    "HoopsHype-Stream/1.0 (+https://hoopshype.com; contact: newsroom@hoopshype.com)";

// ---- wire types (only the fields we read) ----

#[derive(Debug, Deserialize)]
struct AuthorFeedResponse {
    #[serde(default)]
    feed: Vec<FeedViewPost>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchPostsResponse {
    #[serde(default)]
    posts: Vec<PostView>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResolveHandleResponse {
    did: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedViewPost {
    post: PostView,
    reply: Option<ReplyRef>,
    reason: Option<Reason>,
}

#[derive(Debug, Deserialize)]
struct ReplyRef {
    parent: Option<UriRef>,
}

#[derive(Debug, Deserialize)]
struct UriRef {
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reason {
    #[serde(rename = "$type", default)]
    kind: String,
    by: Option<ProfileView>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileView {
    #[serde(default)]
    did: String,
    #[serde(default)]
    handle: String,
    display_name: Option<String>,
    avatar: Option<String>,
}

impl From<ProfileView> for Author {
    fn from(p: ProfileView) -> Self {
        Author {
            did: p.did,
            handle: p.handle,
            display_name: p.display_name,
            avatar: p.avatar,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostView {
    uri: Option<String>,
    author: Option<ProfileView>,
    #[serde(default)]
    record: PostRecord,
    embed: Option<EmbedView>,
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    repost_count: u64,
    #[serde(default)]
    reply_count: u64,
    indexed_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord {
    #[serde(default)]
    text: String,
    created_at: Option<String>,
    reply: Option<ReplyRef>,
    embed: Option<RecordEmbed>,
}

/// The record-level embed; only its `record` link matters (a quote).
#[derive(Debug, Deserialize)]
struct RecordEmbed {
    record: Option<serde_json::Value>,
}

/// Hydrated embed: images, a quoted record, or both (`recordWithMedia`).
#[derive(Debug, Default, Deserialize)]
struct EmbedView {
    #[serde(default)]
    images: Vec<ImageView>,
    record: Option<EmbeddedRecord>,
    media: Option<Box<EmbedView>>,
}

#[derive(Debug, Deserialize)]
struct ImageView {
    fullsize: Option<String>,
}

/// `record#view` carries `{uri, value}`; `recordWithMedia#view` nests it one level.
#[derive(Debug, Deserialize)]
struct EmbeddedRecord {
    uri: Option<String>,
    value: Option<EmbeddedValue>,
    record: Option<Box<EmbeddedRecord>>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedValue {
    text: Option<String>,
}

impl EmbeddedRecord {
    fn quoted(&self) -> QuotedPost {
        match (&self.value, &self.record) {
            (Some(v), _) => QuotedPost {
                uri: self.uri.clone(),
                text: v.text.clone().unwrap_or_default(),
            },
            (None, Some(inner)) => inner.quoted(),
            (None, None) => QuotedPost {
                uri: self.uri.clone(),
                text: String::new(),
            },
        }
    }
}

impl EmbedView {
    fn first_images(&self) -> Vec<String> {
        let images = if self.images.is_empty() {
            self.media.as_deref().map(|m| m.images.as_slice()).unwrap_or_default()
        } else {
            self.images.as_slice()
        };
        images.iter().filter_map(|i| i.fullsize.clone()).collect()
    }
}

impl PostView {
    fn into_raw(self, feed_reply: Option<ReplyRef>, reason: Option<Reason>) -> RawItem {
        let quote = match (&self.embed, &self.record.embed) {
            (Some(EmbedView { record: Some(rec), .. }), _) => Some(rec.quoted()),
            (_, Some(RecordEmbed { record: Some(_) })) => Some(QuotedPost::default()),
            _ => None,
        };
        let media = self.embed.as_ref().map(EmbedView::first_images).unwrap_or_default();
        let reply_parent = feed_reply
            .or(self.record.reply)
            .and_then(|r| r.parent)
            .and_then(|p| p.uri);
        let repost_by = reason
            .filter(|r| r.kind.ends_with("reasonRepost"))
            .and_then(|r| r.by)
            .map(Author::from);

        RawItem {
            uri: self.uri,
            author: self.author.map(Author::from),
            created_at: self.record.created_at,
            indexed_at: self.indexed_at,
            text: self.record.text,
            like_count: self.like_count,
            repost_count: self.repost_count,
            reply_count: self.reply_count,
            reply_parent,
            quote,
            repost_by,
            media,
        }
    }
}

/// Parse a `getAuthorFeed` body.
pub fn parse_author_feed(body: &str) -> Result<FeedPage, FetchError> {
    let resp: AuthorFeedResponse = serde_json::from_str(body)?;
    Ok(FeedPage {
        items: resp
            .feed
            .into_iter()
            .map(|f| f.post.into_raw(f.reply, f.reason))
            .collect(),
        next_cursor: resp.cursor,
    })
}

/// Parse a `searchPosts` body.
pub fn parse_search_posts(body: &str) -> Result<FeedPage, FetchError> {
    let resp: SearchPostsResponse = serde_json::from_str(body)?;
    Ok(FeedPage {
        items: resp.posts.into_iter().map(|p| p.into_raw(None, None)).collect(),
        next_cursor: resp.cursor,
    })
}

pub struct BskyClient {
    http: reqwest::Client,
    base: String,
}

impl BskyClient {
    pub fn new(base: impl Into<String>) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{method}", self.base)
    }

    async fn get_text(&self, method: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
        let t0 = std::time::Instant::now();
        let resp = self.http.get(self.xrpc(method)).query(query).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        histogram!("stream_upstream_ms", "method" => method.to_string())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(body)
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            message: Some(m), ..
        }) => m,
        Ok(ErrorBody { error: Some(e), .. }) => e,
        _ => body.chars().take(200).collect(),
    }
}

#[async_trait]
impl FeedClient for BskyClient {
    async fn fetch_page(
        &self,
        target: &FetchTarget,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<FeedPage, FetchError> {
        let mut query = vec![("limit", page_size.to_string())];
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }
        match target {
            FetchTarget::Author { stable_id, .. } => {
                query.push(("actor", stable_id.clone()));
                let body = self.get_text("app.bsky.feed.getAuthorFeed", &query).await?;
                parse_author_feed(&body)
            }
            FetchTarget::Search { query: q } => {
                query.push(("q", q.clone()));
                query.push(("sort", "latest".to_string()));
                let body = self.get_text("app.bsky.feed.searchPosts", &query).await?;
                parse_search_posts(&body)
            }
        }
    }

    fn name(&self) -> &'static str {
        "bsky-appview"
    }
}

#[async_trait]
impl IdentityLookup for BskyClient {
    async fn resolve_handle(&self, handle: &str) -> Result<Option<String>, FetchError> {
        let query = [("handle", handle.to_string())];
        match self
            .get_text("com.atproto.identity.resolveHandle", &query)
            .await
        {
            Ok(body) => {
                let resp: ResolveHandleResponse = serde_json::from_str(&body)?;
                Ok(resp.did.filter(|d| !d.is_empty()))
            }
            // unknown handle
            Err(FetchError::Status { status: 400, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
