// src/ingest/types.rs
//! Collaborator seams: paginated feed, handle lookup, and source list supplier.

use anyhow::Result;

use crate::error::FetchError;
use crate::model::{RawItem, Source};

/// What one walker pages through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    /// An account's own feed, addressed by stable id (DID).
    Author { stable_id: String, is_priority: bool },
    /// A freeform full-text search.
    Search { query: String },
}

impl FetchTarget {
    pub fn label(&self) -> &str {
        match self {
            FetchTarget::Author { stable_id, .. } => stable_id,
            FetchTarget::Search { query } => query,
        }
    }

    pub fn is_priority(&self) -> bool {
        matches!(self, FetchTarget::Author { is_priority: true, .. })
    }
}

/// One page of results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedPage {
    pub items: Vec<RawItem>,
    pub next_cursor: Option<String>,
}

/// Cursor-paginated content endpoint. Must be idempotent and cursor-stable.
#[async_trait::async_trait]
pub trait FeedClient: Send + Sync {
    async fn fetch_page(
        &self,
        target: &FetchTarget,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<FeedPage, FetchError>;

    fn name(&self) -> &'static str;
}

/// Handle → stable id lookup. `Ok(None)` means the handle does not exist.
#[async_trait::async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn resolve_handle(&self, handle: &str) -> Result<Option<String>, FetchError>;
}

/// Provides the ordered base list the rotator selects from.
#[async_trait::async_trait]
pub trait SourceSupplier: Send + Sync {
    async fn load(&self) -> Result<Vec<Source>>;
}
