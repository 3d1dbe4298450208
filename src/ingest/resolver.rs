// src/ingest/resolver.rs
//! Handle → DID resolution with a process-wide, append-only cache.
//!
//! A DID never changes for a handle within a process lifetime, so successes are
//! cached forever and failures are never cached (a later run may succeed).
//! Every lookup is bounded by the per-request timeout; a timeout is a failure.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::counter;
use once_cell::sync::Lazy;

use crate::ingest::pool::{Deadline, TaskOutcome, WorkerPool};
use crate::ingest::types::IdentityLookup;
use crate::model::Source;

static GLOBAL_DID_CACHE: Lazy<Arc<DidCache>> = Lazy::new(|| Arc::new(DidCache::default()));

#[derive(Debug, Default)]
pub struct DidCache {
    inner: RwLock<HashMap<String, String>>,
}

impl DidCache {
    /// The cache shared by every run in this process.
    pub fn global() -> Arc<DidCache> {
        GLOBAL_DID_CACHE.clone()
    }

    pub fn get(&self, handle: &str) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|m| m.get(&cache_key(handle)).cloned())
    }

    pub fn insert(&self, handle: &str, did: &str) {
        if let Ok(mut m) = self.inner.write() {
            m.entry(cache_key(handle)).or_insert_with(|| did.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cache_key(handle: &str) -> String {
    crate::model::normalize_handle(handle).to_ascii_lowercase()
}

#[derive(Clone)]
pub struct IdentityResolver {
    lookup: Arc<dyn IdentityLookup>,
    cache: Arc<DidCache>,
}

impl IdentityResolver {
    pub fn new(lookup: Arc<dyn IdentityLookup>) -> Self {
        Self::with_cache(lookup, DidCache::global())
    }

    pub fn with_cache(lookup: Arc<dyn IdentityLookup>, cache: Arc<DidCache>) -> Self {
        Self { lookup, cache }
    }

    pub fn cache(&self) -> &Arc<DidCache> {
        &self.cache
    }

    /// Resolve one handle. `None` covers not-found, network failure and timeout.
    pub async fn resolve(&self, handle: &str, timeout: Duration) -> Option<String> {
        if let Some(did) = self.cache.get(handle) {
            counter!("stream_identity_cache_hits_total").increment(1);
            return Some(did);
        }
        let normalized = crate::model::normalize_handle(handle);
        let Ok(looked_up) = tokio::time::timeout(timeout, self.lookup.resolve_handle(&normalized)).await
        else {
            counter!("stream_identity_failures_total").increment(1);
            tracing::warn!(
                target: "identity",
                handle,
                timeout_ms = timeout.as_millis() as u64,
                "handle resolution timed out"
            );
            return None;
        };
        match looked_up {
            Ok(Some(did)) if !did.is_empty() => {
                self.cache.insert(handle, &did);
                Some(did)
            }
            Ok(_) => {
                counter!("stream_identity_failures_total").increment(1);
                tracing::warn!(target: "identity", handle, "handle not found");
                None
            }
            Err(e) => {
                counter!("stream_identity_failures_total").increment(1);
                tracing::warn!(target: "identity", handle, error = %e, "handle resolution failed");
                None
            }
        }
    }

    /// Fill in missing stable ids with bounded concurrency. Unresolvable sources
    /// are dropped; the order of the rest is preserved.
    pub async fn resolve_sources(
        &self,
        sources: Vec<Source>,
        pool: WorkerPool,
        deadline: Deadline,
        per_request_timeout: Duration,
    ) -> Vec<Source> {
        let tasks: Vec<_> = sources
            .iter()
            .map(|s| {
                let known = s.stable_id.clone().filter(|id| !id.is_empty());
                let handle = s.handle.as_str();
                move || async move {
                    if let Some(did) = known {
                        self.cache.insert(handle, &did);
                        return Ok::<_, ()>(Some(did));
                    }
                    Ok(self.resolve(handle, per_request_timeout).await)
                }
            })
            .collect();

        let outcomes = pool.run(tasks, deadline).await;

        sources
            .into_iter()
            .zip(outcomes)
            .filter_map(|(mut source, outcome)| match outcome {
                TaskOutcome::Completed(Some(did)) => {
                    source.stable_id = Some(did);
                    Some(source)
                }
                _ => None,
            })
            .collect()
    }
}
