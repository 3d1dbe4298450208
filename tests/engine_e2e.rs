// tests/engine_e2e.rs
//
// End-to-end engine scenarios against in-memory collaborators.
//
// Covered:
// - reposts example (reply toggle + threshold + sort)
// - partial resolution failure → scanned == 2
// - a source that never answers vs. the global deadline
// - a handle lookup that never answers vs. the per-request timeout
// - an out-of-range window is a configuration error
// - window / kind-toggle invariants over random feeds

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};

use bsky_stream_engine::ingest::resolver::{DidCache, IdentityResolver};
use bsky_stream_engine::ingest::types::{FeedClient, FeedPage, FetchTarget, IdentityLookup};
use bsky_stream_engine::model::{Author, QuotedPost, RawItem};
use bsky_stream_engine::{Engine, FetchError, ItemKind, RunConfig, RunError, SortKey, Source};

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-04-02T15:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn author(did: &str) -> Author {
    Author {
        did: did.to_string(),
        handle: format!("{}.bsky.social", did.trim_start_matches("did:plc:")),
        display_name: None,
        avatar: None,
    }
}

fn post(did: &str, rkey: &str, minutes_ago: i64, likes: u64, reposts: u64) -> RawItem {
    RawItem {
        uri: Some(format!("at://{did}/app.bsky.feed.post/{rkey}")),
        author: Some(author(did)),
        created_at: Some((now() - chrono::Duration::minutes(minutes_ago)).to_rfc3339()),
        text: format!("post {rkey}"),
        like_count: likes,
        repost_count: reposts,
        ..Default::default()
    }
}

enum Script {
    Items(Vec<RawItem>),
    Hang,
}

struct FakeFeed {
    by_did: HashMap<String, Script>,
}

#[async_trait::async_trait]
impl FeedClient for FakeFeed {
    async fn fetch_page(
        &self,
        target: &FetchTarget,
        _cursor: Option<&str>,
        _page_size: u32,
    ) -> Result<FeedPage, FetchError> {
        match self.by_did.get(target.label()) {
            Some(Script::Items(items)) => Ok(FeedPage {
                items: items.clone(),
                next_cursor: None,
            }),
            Some(Script::Hang) => std::future::pending().await,
            None => Ok(FeedPage::default()),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// `x.bsky.social` → `did:plc:x`; anything starting with `ghost` is unknown.
struct PrefixLookup;

#[async_trait::async_trait]
impl IdentityLookup for PrefixLookup {
    async fn resolve_handle(&self, handle: &str) -> Result<Option<String>, FetchError> {
        Ok(handle
            .strip_suffix(".bsky.social")
            .filter(|h| !h.starts_with("ghost"))
            .map(|h| format!("did:plc:{h}")))
    }
}

/// Like `PrefixLookup`, but handles starting with `stuck` never get an answer.
struct StuckLookup;

#[async_trait::async_trait]
impl IdentityLookup for StuckLookup {
    async fn resolve_handle(&self, handle: &str) -> Result<Option<String>, FetchError> {
        if handle.starts_with("stuck") {
            return std::future::pending().await;
        }
        PrefixLookup.resolve_handle(handle).await
    }
}

fn engine(scripts: Vec<(&str, Script)>) -> Engine {
    engine_with_lookup(scripts, Arc::new(PrefixLookup))
}

fn engine_with_lookup(scripts: Vec<(&str, Script)>, lookup: Arc<dyn IdentityLookup>) -> Engine {
    let feed = FakeFeed {
        by_did: scripts
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    };
    let resolver = IdentityResolver::with_cache(lookup, Arc::new(DidCache::default()));
    Engine::new(Arc::new(feed), resolver)
}

#[tokio::test]
async fn reposts_example_keeps_only_qualifying_original() {
    let mut reply = post("did:plc:b", "b1", 30, 0, 6);
    reply.reply_parent = Some("at://did:plc:z/app.bsky.feed.post/parent".into());

    let e = engine(vec![
        (
            "did:plc:a",
            Script::Items(vec![post("did:plc:a", "a1", 60, 1, 10), post("did:plc:a", "a2", 20, 0, 2)]),
        ),
        ("did:plc:b", Script::Items(vec![reply])),
    ]);
    let cfg = RunConfig {
        window_hours: 24,
        min_reposts: 5,
        include_replies: false,
        sort_key: SortKey::Reposts,
        ..Default::default()
    };
    let sources = [Source::new("a.bsky.social"), Source::new("b.bsky.social")];

    let out = e.run(&cfg, &sources, now()).await.unwrap();
    let ids: Vec<_> = out.items.iter().map(|r| r.item.stable_id.as_str()).collect();
    assert_eq!(ids, vec!["at://did:plc:a/app.bsky.feed.post/a1"]);
    assert_eq!(out.scanned_source_count, 2);
}

#[tokio::test]
async fn unresolvable_source_is_dropped_not_fatal() {
    let e = engine(vec![
        ("did:plc:a", Script::Items(vec![post("did:plc:a", "a1", 5, 0, 0)])),
        ("did:plc:c", Script::Items(vec![post("did:plc:c", "c1", 6, 0, 0)])),
    ]);
    let sources = [
        Source::new("a.bsky.social"),
        Source::new("ghost.bsky.social"),
        Source::new("c.bsky.social"),
    ];
    let out = e.run(&RunConfig::default(), &sources, now()).await.unwrap();

    assert_eq!(out.scanned_source_count, 2);
    let authors: Vec<_> = out.items.iter().map(|r| r.item.author_did.as_str()).collect();
    assert_eq!(authors, vec!["did:plc:a", "did:plc:c"]);
}

#[tokio::test(start_paused = true)]
async fn hanging_source_does_not_hold_the_run() {
    let e = engine(vec![
        ("did:plc:slow", Script::Hang),
        ("did:plc:fast", Script::Items(vec![post("did:plc:fast", "f1", 5, 0, 0)])),
        ("did:plc:quick", Script::Items(vec![post("did:plc:quick", "q1", 9, 0, 0)])),
    ]);
    let cfg = RunConfig {
        global_deadline_ms: 1_000,
        per_request_timeout_ms: 900,
        ..Default::default()
    };
    let sources = [
        Source::new("slow.bsky.social"),
        Source::new("fast.bsky.social"),
        Source::new("quick.bsky.social"),
    ];

    let out = e.run(&cfg, &sources, now()).await.unwrap();
    assert!(out.elapsed_ms <= cfg.global_deadline_ms + cfg.per_request_timeout_ms);
    assert_eq!(out.items.len(), 2);
    assert_eq!(out.scanned_source_count, 3);
}

#[tokio::test(start_paused = true)]
async fn stuck_handle_lookup_is_bounded_by_the_request_timeout() {
    let e = engine_with_lookup(
        vec![("did:plc:fast", Script::Items(vec![post("did:plc:fast", "f1", 5, 0, 0)]))],
        Arc::new(StuckLookup),
    );
    let cfg = RunConfig {
        global_deadline_ms: 1_000,
        per_request_timeout_ms: 900,
        ..Default::default()
    };
    let sources = [Source::new("stuck.bsky.social"), Source::new("fast.bsky.social")];

    let out = tokio::time::timeout(Duration::from_secs(3600), e.run(&cfg, &sources, now()))
        .await
        .expect("run finishes")
        .unwrap();
    assert_eq!(out.scanned_source_count, 1);
    assert_eq!(out.items.len(), 1);
    assert!(out.elapsed_ms <= cfg.global_deadline_ms + cfg.per_request_timeout_ms);
    assert!(e.resolver().cache().get("stuck.bsky.social").is_none());
}

#[tokio::test]
async fn out_of_range_window_is_a_configuration_error() {
    let e = engine(vec![]);
    let cfg = RunConfig {
        window_hours: u32::MAX,
        ..Default::default()
    };
    let err = e
        .run(&cfg, &[Source::new("a.bsky.social")], now())
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Configuration(_)));
}

#[tokio::test(start_paused = true)]
async fn tasks_after_the_deadline_never_start() {
    // one slot: slow1 ends at 900ms, slow2 starts before the 1s deadline and
    // ends at 1800ms, so the fast source is never started.
    let e = engine(vec![
        ("did:plc:slow1", Script::Hang),
        ("did:plc:slow2", Script::Hang),
        ("did:plc:fast", Script::Items(vec![post("did:plc:fast", "f1", 5, 0, 0)])),
    ]);
    let cfg = RunConfig {
        concurrency_limit: 1,
        global_deadline_ms: 1_000,
        per_request_timeout_ms: 900,
        ..Default::default()
    };
    let sources = [
        Source::new("slow1.bsky.social"),
        Source::new("slow2.bsky.social"),
        Source::new("fast.bsky.social"),
    ];

    let out = e.run(&cfg, &sources, now()).await.unwrap();
    assert_eq!(out.scanned_source_count, 2);
    assert!(out.items.is_empty());
    assert_eq!(out.elapsed_ms, 1_800);
}

fn random_item(rng: &mut StdRng, did: &str, i: usize) -> RawItem {
    let mut it = post(
        did,
        &format!("r{i}"),
        rng.random_range(0..72 * 60),
        rng.random_range(0..20),
        rng.random_range(0..20),
    );
    match rng.random_range(0..4) {
        0 => it.reply_parent = Some("at://parent".into()),
        1 => {
            it.quote = Some(QuotedPost {
                uri: None,
                text: "quoted".into(),
            })
        }
        2 => it.repost_by = Some(author("did:plc:someone")),
        _ => {}
    }
    it
}

#[tokio::test]
async fn window_and_kind_toggles_hold_for_random_feeds() {
    let mut rng = StdRng::seed_from_u64(7);
    let items_a: Vec<_> = (0..60).map(|i| random_item(&mut rng, "did:plc:a", i)).collect();
    let items_b: Vec<_> = (0..60).map(|i| random_item(&mut rng, "did:plc:b", i)).collect();
    let e = engine(vec![
        ("did:plc:a", Script::Items(items_a)),
        ("did:plc:b", Script::Items(items_b)),
    ]);
    let sources = [Source::new("a.bsky.social"), Source::new("b.bsky.social")];

    for (replies, quotes, reposts) in [(false, true, true), (true, false, true), (true, true, false)] {
        let cfg = RunConfig {
            window_hours: 24,
            include_replies: replies,
            include_quotes: quotes,
            include_reposts: reposts,
            limit: 200,
            raw_headroom_factor: 5,
            ..Default::default()
        };
        let window_start = now() - chrono::Duration::hours(24);
        let out = e.run(&cfg, &sources, now()).await.unwrap();
        assert!(!out.items.is_empty());
        for r in &out.items {
            assert!(r.item.created_at >= window_start);
            match r.item.kind {
                ItemKind::Reply => assert!(replies),
                ItemKind::Quote => assert!(quotes),
                ItemKind::Repost => assert!(reposts),
                ItemKind::Original => {}
            }
        }
    }
}

#[tokio::test]
async fn same_inputs_give_same_output() {
    let items: Vec<_> = (0..10)
        .map(|i| post("did:plc:a", &format!("p{i}"), 10, 3, 3))
        .collect();
    let e = engine(vec![("did:plc:a", Script::Items(items))]);
    let cfg = RunConfig {
        sort_key: SortKey::Total,
        ..Default::default()
    };
    let sources = [Source::new("a.bsky.social")];

    let first = e.run(&cfg, &sources, now()).await.unwrap();
    let second = e.run(&cfg, &sources, now()).await.unwrap();
    let ids = |r: &bsky_stream_engine::RunResult| {
        r.items
            .iter()
            .map(|i| i.item.stable_id.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    let mut sorted = ids(&first);
    sorted.sort();
    assert_eq!(ids(&first), sorted, "equal keys fall back to stable-id order");
}
