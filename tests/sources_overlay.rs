// tests/sources_overlay.rs
//
// Source list assembly as the service does it: CSV file → overlay from a JSON
// store → daily rotation.

use std::sync::Arc;

use chrono::NaiveDate;

use bsky_stream_engine::ingest::rotation;
use bsky_stream_engine::ingest::sources::{apply_overlay, CsvSourceSupplier};
use bsky_stream_engine::ingest::types::SourceSupplier;
use bsky_stream_engine::overlay::{JsonFileOverlayStore, Watchlist};

const CSV: &str = "handle,did,display,priority
a.bsky.social,did:plc:a,Reporter A,1
b.bsky.social,,Reporter B,
c.bsky.social,,,
d.bsky.social,,,
";

#[tokio::test]
async fn csv_plus_persisted_overlay_plus_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("reporters.csv");
    std::fs::write(&csv_path, CSV).unwrap();
    let store_path = dir.path().join("watchlist.json");

    let watchlist = Watchlist::new(Arc::new(JsonFileOverlayStore::new(&store_path)));
    watchlist.add("e.bsky.social", Some("Reporter E")).await.unwrap();
    watchlist.remove("@B.bsky.social").await.unwrap();

    // a fresh store over the same file sees the persisted state
    let reopened = Watchlist::new(Arc::new(JsonFileOverlayStore::new(&store_path)));
    let overlay = reopened.get().await.unwrap();

    let base = CsvSourceSupplier::new(None, csv_path).unwrap().load().await.unwrap();
    let merged = apply_overlay(base, &overlay);
    let handles: Vec<_> = merged.iter().map(|s| s.handle.as_str()).collect();
    assert_eq!(
        handles,
        vec!["a.bsky.social", "c.bsky.social", "d.bsky.social", "e.bsky.social"]
    );
    assert!(merged[0].priority);
    assert_eq!(merged[0].stable_id.as_deref(), Some("did:plc:a"));
    assert_eq!(merged[3].display_name, "Reporter E");

    // 1970-01-03 is epoch day 2 → start at index 2 and wrap
    let day = NaiveDate::from_ymd_opt(1970, 1, 3).unwrap();
    let picked = rotation::select(&merged, day, 3);
    let handles: Vec<_> = picked.iter().map(|s| s.handle.as_str()).collect();
    assert_eq!(handles, vec!["d.bsky.social", "e.bsky.social", "a.bsky.social"]);
}

#[tokio::test]
async fn unreachable_remote_list_falls_back_to_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("reporters.csv");
    std::fs::write(&csv_path, CSV).unwrap();

    // nothing listens on port 9 locally; the request fails fast
    let supplier = CsvSourceSupplier::new(Some("http://127.0.0.1:9/reporters.csv".into()), csv_path).unwrap();
    let sources = supplier.load().await.unwrap();
    assert_eq!(sources.len(), 4);
}
