// src/ingest/mod.rs
pub mod pool;
pub mod providers;
pub mod resolver;
pub mod rotation;
pub mod sources;
pub mod types;
pub mod walker;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("stream_runs_total", "Engine runs started, by mode.");
        describe_counter!("stream_pages_fetched_total", "Pages fetched successfully.");
        describe_counter!(
            "stream_fetch_errors_total",
            "Upstream page fetch failures, by kind."
        );
        describe_counter!(
            "stream_fetch_timeouts_total",
            "Page requests that hit the per-request timeout."
        );
        describe_counter!(
            "stream_items_malformed_total",
            "Fetched items dropped for a missing/unparsable timestamp or field."
        );
        describe_counter!(
            "stream_identity_cache_hits_total",
            "Handle resolutions served from the process cache."
        );
        describe_counter!(
            "stream_identity_failures_total",
            "Handles that could not be resolved."
        );
        describe_counter!(
            "stream_tasks_skipped_total",
            "Pool tasks never started because the deadline passed."
        );
        describe_histogram!("stream_run_ms", "Run duration in milliseconds.");
        describe_histogram!("stream_upstream_ms", "Upstream call latency in milliseconds.");
        describe_gauge!("stream_last_run_ts", "Unix ts when a run last finished.");
    });
}
