// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod api;
pub mod assemble;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod overlay;
pub mod relevance;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::{RunConfig, SortKey, Tunables};
pub use crate::engine::Engine;
pub use crate::error::{FetchError, MalformedItem, RunError};
pub use crate::model::{CandidateItem, ItemKind, ResultItem, RunResult, Source};

use std::sync::Arc;

use anyhow::Context;
use axum::Router;

use crate::ingest::providers::BskyClient;
use crate::ingest::sources::CsvSourceSupplier;
use crate::overlay::{JsonFileOverlayStore, Watchlist};

/// Production wiring: AppView client, CSV reporter list, JSON overlay store.
pub fn build_state(tunables: Tunables) -> anyhow::Result<AppState> {
    tunables
        .run_config()
        .validate()
        .context("stream tunables produce an invalid run configuration")?;

    let client = Arc::new(BskyClient::new(tunables.appview_base.clone()).context("building AppView client")?);
    let sources = Arc::new(CsvSourceSupplier::new(
        tunables.reporters_csv_url.clone(),
        tunables.reporters_csv_path.clone(),
    )?);
    let watchlist = Watchlist::new(Arc::new(JsonFileOverlayStore::new(
        tunables.watchlist_store_path.clone(),
    )));

    Ok(AppState {
        engine: Engine::from_client(client),
        tunables: Arc::new(tunables),
        sources,
        watchlist,
        clock: chrono::Utc::now,
    })
}

/// Call this from the Shuttle entrypoint (after tracing init).
pub fn app() -> anyhow::Result<Router> {
    let tunables = Tunables::load_default()?;
    tracing::info!(
        target: "stream",
        concurrency = tunables.concurrency,
        max_reporters = tunables.max_reporters,
        tz = %tunables.time_zone,
        "stream tunables loaded"
    );
    Ok(router(build_state(tunables)?))
}
