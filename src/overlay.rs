// src/overlay.rs
//! Persisted watchlist overlay: accounts added to, or removed from, the base list.
//!
//! The engine never sees this; callers merge it with
//! [`crate::ingest::sources::apply_overlay`] before a run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::model::normalize_handle;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverlayEntry {
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchlistOverlay {
    #[serde(default)]
    pub extras: Vec<OverlayEntry>,
    #[serde(default)]
    pub removals: Vec<String>,
}

fn same_handle(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

impl WatchlistOverlay {
    /// Adds (or renames) an extra and cancels any earlier removal of it.
    pub fn add(&mut self, handle: &str, display: Option<&str>) -> bool {
        let handle = normalize_handle(handle);
        if handle.is_empty() {
            return false;
        }
        let display = display
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        self.removals.retain(|r| !same_handle(r, &handle));
        match self.extras.iter_mut().find(|e| same_handle(&e.handle, &handle)) {
            Some(existing) => {
                if display.is_some() {
                    existing.display = display;
                }
            }
            None => self.extras.push(OverlayEntry { handle, display }),
        }
        true
    }

    /// Drops the handle from extras and records it as removed from the base list.
    pub fn remove(&mut self, handle: &str) -> bool {
        let handle = normalize_handle(handle);
        if handle.is_empty() {
            return false;
        }
        self.extras.retain(|e| !same_handle(&e.handle, &handle));
        if !self.removals.iter().any(|r| same_handle(r, &handle)) {
            self.removals.push(handle);
        }
        true
    }

    /// Normalized copy: trimmed handles without `@`, no blanks, no duplicates.
    pub fn normalized(&self) -> Self {
        let mut out = WatchlistOverlay::default();
        for e in &self.extras {
            out.add(&e.handle, e.display.as_deref());
        }
        for r in &self.removals {
            let h = normalize_handle(r);
            if h.is_empty()
                || out.extras.iter().any(|e| same_handle(&e.handle, &h))
                || out.removals.iter().any(|x| same_handle(x, &h))
            {
                continue;
            }
            out.removals.push(h);
        }
        out
    }
}

#[async_trait]
pub trait OverlayStore: Send + Sync {
    async fn load(&self) -> Result<WatchlistOverlay>;
    async fn save(&self, overlay: &WatchlistOverlay) -> Result<()>;
}

/// JSON file; a missing file reads as an empty overlay.
pub struct JsonFileOverlayStore {
    path: PathBuf,
}

impl JsonFileOverlayStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl OverlayStore for JsonFileOverlayStore {
    async fn load(&self) -> Result<WatchlistOverlay> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(WatchlistOverlay::default()),
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("parsing overlay {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(WatchlistOverlay::default()),
            Err(e) => Err(e).with_context(|| format!("reading overlay {}", self.path.display())),
        }
    }

    async fn save(&self, overlay: &WatchlistOverlay) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(overlay).context("serializing overlay")?;
        // write-then-rename so readers never see a partial file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryOverlayStore {
    inner: Mutex<WatchlistOverlay>,
}

#[async_trait]
impl OverlayStore for MemoryOverlayStore {
    async fn load(&self) -> Result<WatchlistOverlay> {
        Ok(self.inner.lock().await.clone())
    }

    async fn save(&self, overlay: &WatchlistOverlay) -> Result<()> {
        *self.inner.lock().await = overlay.clone();
        Ok(())
    }
}

/// Serializes read-modify-write cycles against one store.
#[derive(Clone)]
pub struct Watchlist {
    store: Arc<dyn OverlayStore>,
    write_lock: Arc<Mutex<()>>,
}

impl Watchlist {
    pub fn new(store: Arc<dyn OverlayStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn get(&self) -> Result<WatchlistOverlay> {
        self.store.load().await
    }

    pub async fn add(&self, handle: &str, display: Option<&str>) -> Result<WatchlistOverlay> {
        self.update(|o| o.add(handle, display)).await
    }

    pub async fn remove(&self, handle: &str) -> Result<WatchlistOverlay> {
        self.update(|o| o.remove(handle)).await
    }

    pub async fn replace(&self, overlay: WatchlistOverlay) -> Result<WatchlistOverlay> {
        let _guard = self.write_lock.lock().await;
        let next = overlay.normalized();
        self.store.save(&next).await?;
        Ok(next)
    }

    async fn update<F>(&self, f: F) -> Result<WatchlistOverlay>
    where
        F: FnOnce(&mut WatchlistOverlay) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let mut overlay = self.store.load().await?;
        if f(&mut overlay) {
            self.store.save(&overlay).await?;
        }
        Ok(overlay)
    }
}
