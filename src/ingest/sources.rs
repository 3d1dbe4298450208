// src/ingest/sources.rs
//! Base source list: CSV parsing, remote/local loading, and overlay merge.
//!
//! CSV layout (first line is a header and is skipped):
//! `handle,did[,display_name[,priority]]`

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::ingest::types::SourceSupplier;
use crate::model::{normalize_handle, Source};
use crate::overlay::WatchlistOverlay;

/// Parse the reporter CSV. Blank lines and rows without a handle are skipped;
/// duplicate handles (case-insensitive) keep the first row.
pub fn parse_csv(text: &str) -> Vec<Source> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for line in text.trim().lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut cols = line.split(',').map(str::trim);
        let handle = normalize_handle(cols.next().unwrap_or_default());
        if handle.is_empty() || !seen.insert(handle.to_ascii_lowercase()) {
            continue;
        }
        let did = cols.next().filter(|d| !d.is_empty()).map(str::to_string);
        let display = cols.next().filter(|d| !d.is_empty()).map(str::to_string);
        let priority = cols
            .next()
            .map(|p| matches!(p.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let mut source = Source::new(handle);
        source.stable_id = did;
        if let Some(d) = display {
            source.display_name = d;
        }
        source.priority = priority;
        out.push(source);
    }
    out
}

/// Removals first (case-insensitive), then extras appended when not already present.
pub fn apply_overlay(base: Vec<Source>, overlay: &WatchlistOverlay) -> Vec<Source> {
    let removed: HashSet<String> = overlay
        .removals
        .iter()
        .map(|h| normalize_handle(h).to_ascii_lowercase())
        .collect();

    let mut out: Vec<Source> = base
        .into_iter()
        .filter(|s| !removed.contains(&s.handle.to_ascii_lowercase()))
        .collect();

    let mut present: HashSet<String> = out.iter().map(|s| s.handle.to_ascii_lowercase()).collect();
    for extra in &overlay.extras {
        let handle = normalize_handle(&extra.handle);
        let key = handle.to_ascii_lowercase();
        if handle.is_empty() || removed.contains(&key) || !present.insert(key) {
            continue;
        }
        let source = Source::new(handle);
        out.push(match extra.display.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(d) => source.with_display_name(d),
            None => source,
        });
    }
    out
}

const REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Loads the CSV from a remote URL when configured, falling back to a local file.
pub struct CsvSourceSupplier {
    http: reqwest::Client,
    remote_url: Option<String>,
    local_path: PathBuf,
}

impl CsvSourceSupplier {
    pub fn new(remote_url: Option<String>, local_path: PathBuf) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::ingest::providers::bsky::USER_AGENT)
            .timeout(REMOTE_TIMEOUT)
            .build()
            .context("building reporter list http client")?;
        Ok(Self {
            http,
            remote_url,
            local_path,
        })
    }

    async fn fetch_remote(&self, url: &str) -> Result<String> {
        let resp = self
            .http
            .get(url)
            .header("cache-control", "no-cache")
            .send()
            .await
            .context("reporters csv http get()")?;
        if !resp.status().is_success() {
            return Err(anyhow!("reporters csv http status {}", resp.status()));
        }
        resp.text().await.context("reporters csv http .text()")
    }
}

#[async_trait]
impl SourceSupplier for CsvSourceSupplier {
    async fn load(&self) -> Result<Vec<Source>> {
        if let Some(url) = &self.remote_url {
            match self.fetch_remote(url).await {
                Ok(text) => return Ok(parse_csv(&text)),
                Err(e) => {
                    tracing::warn!(target: "stream", error = ?e, url = %url, "remote reporter list unavailable; using local file");
                }
            }
        }
        let text = tokio::fs::read_to_string(&self.local_path)
            .await
            .with_context(|| format!("reading reporters from {}", self.local_path.display()))?;
        Ok(parse_csv(&text))
    }
}

/// A fixed list; used for explicit handle lists and tests.
pub struct StaticSources(pub Vec<Source>);

#[async_trait]
impl SourceSupplier for StaticSources {
    async fn load(&self) -> Result<Vec<Source>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::OverlayEntry;

    const CSV: &str = "handle,did,display,priority\n\
        @shams.bsky.social, did:plc:shams ,Shams Charania,1\n\
        \n\
        woj.bsky.social,,,\n\
        SHAMS.bsky.social,did:plc:dupe\n\
        ,did:plc:nohandle\n\
        marc.bsky.social\n";

    #[test]
    fn csv_parses_columns_and_skips_header() {
        let v = parse_csv(CSV);
        assert_eq!(v.len(), 3);
        assert_eq!(v[0].handle, "shams.bsky.social");
        assert_eq!(v[0].stable_id.as_deref(), Some("did:plc:shams"));
        assert_eq!(v[0].display_name, "Shams Charania");
        assert!(v[0].priority);
        assert_eq!(v[1].handle, "woj.bsky.social");
        assert_eq!(v[1].stable_id, None);
        assert_eq!(v[1].display_name, "@woj.bsky.social");
        assert!(!v[1].priority);
        assert_eq!(v[2].handle, "marc.bsky.social");
    }

    #[test]
    fn overlay_removes_then_appends() {
        let base = parse_csv(CSV);
        let overlay = WatchlistOverlay {
            extras: vec![
                OverlayEntry {
                    handle: "@new.bsky.social".into(),
                    display: Some("New Reporter".into()),
                },
                OverlayEntry {
                    handle: "WOJ.bsky.social".into(),
                    display: None,
                },
            ],
            removals: vec!["marc.bsky.social".into()],
        };
        let merged = apply_overlay(base, &overlay);
        let handles: Vec<_> = merged.iter().map(|s| s.handle.as_str()).collect();
        assert_eq!(
            handles,
            vec!["shams.bsky.social", "woj.bsky.social", "new.bsky.social"]
        );
        assert_eq!(merged[2].display_name, "New Reporter");
    }

    #[tokio::test]
    async fn local_file_is_used_without_remote() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("reporters.csv");
        std::fs::write(&p, CSV).unwrap();
        let supplier = CsvSourceSupplier::new(None, p).unwrap();
        let v = supplier.load().await.unwrap();
        assert_eq!(v.len(), 3);
    }

    #[tokio::test]
    async fn missing_local_file_is_an_error() {
        let supplier = CsvSourceSupplier::new(None, PathBuf::from("/nonexistent/reporters.csv")).unwrap();
        assert!(supplier.load().await.is_err());
    }
}
