//! # Stream Engine
//! One invocation: select → resolve → walk (bounded, time-budgeted) → classify →
//! filter → match → rank → assemble.
//!
//! Partial failures only shrink the result; `scanned_source_count` reports how many
//! fetch tasks actually started. The only errors are a bad configuration (before
//! any network work) and every started source failing upstream on its first page.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::analyze::{classify, rank, FilterConfig};
use crate::assemble::ResultAssembler;
use crate::config::RunConfig;
use crate::error::RunError;
use crate::ingest::pool::{Deadline, TaskOutcome, WorkerPool};
use crate::ingest::resolver::IdentityResolver;
use crate::ingest::rotation;
use crate::ingest::types::{FeedClient, FetchTarget, IdentityLookup};
use crate::ingest::walker::{PageWalker, RawBudget, WalkSummary};
use crate::model::{CandidateItem, FetchWindow, RawItem, RunResult, Source};
use crate::relevance::{QueryMatcher, QuerySpec};

#[derive(Clone)]
pub struct Engine {
    feed: Arc<dyn FeedClient>,
    resolver: IdentityResolver,
}

/// Shared, read-only state of one run's fetch stage.
struct RunContext<'a> {
    cfg: &'a RunConfig,
    filter: FilterConfig,
    matcher: QueryMatcher,
    window: FetchWindow,
    deadline: Deadline,
}

impl Engine {
    pub fn new(feed: Arc<dyn FeedClient>, resolver: IdentityResolver) -> Self {
        Self { feed, resolver }
    }

    /// One client serving both pages and handle lookups, with the process-wide DID cache.
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: FeedClient + IdentityLookup + 'static,
    {
        let lookup: Arc<dyn IdentityLookup> = client.clone();
        Self::new(client, IdentityResolver::new(lookup))
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Scan a rotating subset of `sources`. `now` fixes both the freshness window
    /// and the rotation date.
    pub async fn run(
        &self,
        cfg: &RunConfig,
        sources: &[Source],
        now: DateTime<Utc>,
    ) -> Result<RunResult, RunError> {
        let started = Instant::now();
        let tz = cfg.validate()?;
        let ctx = self.context(cfg, now)?;
        crate::ingest::ensure_metrics_described();
        counter!("stream_runs_total", "mode" => "reporters").increment(1);

        let unique = dedupe_sources(sources);
        let selected = rotation::select(&unique, rotation::local_date(now, tz), cfg.max_sources);
        let resolved = self
            .resolver
            .resolve_sources(
                selected.clone(),
                WorkerPool::new(cfg.concurrency_limit),
                ctx.deadline,
                cfg.per_request_timeout(),
            )
            .await;
        debug!(
            target: "stream",
            available = unique.len(),
            selected = selected.len(),
            resolved = resolved.len(),
            "sources prepared"
        );

        let targets: Vec<FetchTarget> = resolved
            .into_iter()
            .filter_map(|s| {
                s.stable_id.map(|stable_id| FetchTarget::Author {
                    stable_id,
                    is_priority: s.priority,
                })
            })
            .collect();

        let (items, scanned) = self.collect(&ctx, &targets).await?;
        Ok(self.finish(cfg, tz, items, scanned, started, now))
    }

    /// Freeform full-text search: one walker, no rotation or resolution.
    pub async fn run_search(
        &self,
        cfg: &RunConfig,
        query: &str,
        now: DateTime<Utc>,
    ) -> Result<RunResult, RunError> {
        let started = Instant::now();
        let tz = cfg.validate()?;
        let query = query.trim();
        if query.is_empty() {
            return Err(RunError::config("search query must not be empty"));
        }
        let ctx = self.context(cfg, now)?;
        crate::ingest::ensure_metrics_described();
        counter!("stream_runs_total", "mode" => "search").increment(1);

        let targets = [FetchTarget::Search {
            query: query.to_string(),
        }];
        let (items, scanned) = self.collect(&ctx, &targets).await?;
        Ok(self.finish(cfg, tz, items, scanned, started, now))
    }

    fn context<'a>(&self, cfg: &'a RunConfig, now: DateTime<Utc>) -> Result<RunContext<'a>, RunError> {
        let window = FetchWindow::from_lookback(now, cfg.window_hours)?;
        Ok(RunContext {
            cfg,
            filter: FilterConfig::from_run_config(cfg, window),
            matcher: QueryMatcher::compile(&QuerySpec::from_run_config(cfg))?,
            window,
            deadline: Deadline::after(cfg.global_deadline()),
        })
    }

    /// Run one walker per target in the pool; returns the kept items and the
    /// number of targets that started.
    async fn collect(
        &self,
        ctx: &RunContext<'_>,
        targets: &[FetchTarget],
    ) -> Result<(Vec<CandidateItem>, usize), RunError> {
        let budget = RawBudget::new(ctx.cfg.raw_item_budget());
        let buffer: Mutex<Vec<CandidateItem>> = Mutex::new(Vec::new());

        let tasks: Vec<_> = targets
            .iter()
            .map(|target| {
                let budget = &budget;
                let buffer = &buffer;
                move || async move {
                    let walker = PageWalker {
                        feed: self.feed.as_ref(),
                        target,
                        page_size: ctx.cfg.page_size,
                        request_timeout: ctx.cfg.per_request_timeout(),
                        max_pages: ctx.cfg.max_pages,
                        deadline: ctx.deadline,
                        budget,
                        window_start: ctx.window.window_start,
                    };
                    let summary = walker
                        .walk(|page| {
                            let kept = accept_page(ctx, page, target.is_priority());
                            buffer
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .extend(kept);
                        })
                        .await;
                    Ok::<WalkSummary, Infallible>(summary)
                }
            })
            .collect();

        let outcomes = WorkerPool::new(ctx.cfg.concurrency_limit)
            .run(tasks, ctx.deadline)
            .await;

        let scanned = outcomes.iter().filter(|o| !o.is_skipped()).count();
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, TaskOutcome::Completed(s) if s.failed_upstream()))
            .count();
        if scanned > 0 && failed == scanned {
            tracing::error!(target: "stream", failed, "every source failed upstream");
            return Err(RunError::UpstreamUnavailable {
                failed_sources: failed,
            });
        }

        let items = buffer.into_inner().unwrap_or_else(PoisonError::into_inner);
        Ok((items, scanned))
    }

    fn finish(
        &self,
        cfg: &RunConfig,
        tz: chrono_tz::Tz,
        items: Vec<CandidateItem>,
        scanned: usize,
        started: Instant,
        now: DateTime<Utc>,
    ) -> RunResult {
        let buffered = items.len();
        let ordered = canonical_order(items);
        let ranked = rank(ordered, cfg.sort_key, cfg.priority_first);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let assembler = ResultAssembler {
            limit: cfg.limit,
            time_zone: tz,
            utm_source: cfg.utm_source.clone(),
        };
        let result = assembler.assemble(ranked, scanned, elapsed_ms);

        histogram!("stream_run_ms").record(elapsed_ms as f64);
        gauge!("stream_last_run_ts").set(now.timestamp() as f64);
        info!(
            target: "stream",
            scanned,
            buffered,
            kept = result.items.len(),
            elapsed_ms,
            "stream run finished"
        );
        result
    }
}

/// Classify → candidate → filter → match, for one fetched page.
fn accept_page(ctx: &RunContext<'_>, page: Vec<RawItem>, is_priority: bool) -> Vec<CandidateItem> {
    let mut kept = Vec::new();
    for raw in page {
        let kind = classify(&raw);
        let candidate = match CandidateItem::from_raw(raw, kind, is_priority) {
            Ok(c) => c,
            Err(e) => {
                counter!("stream_items_malformed_total").increment(1);
                debug!(target: "stream", error = %e, "dropping malformed item");
                continue;
            }
        };
        if ctx.filter.keep(&candidate) && ctx.matcher.matches_candidate(&candidate) {
            kept.push(candidate);
        }
    }
    kept
}

/// Case-insensitive handle dedupe, first occurrence wins; blank handles dropped.
fn dedupe_sources(sources: &[Source]) -> Vec<Source> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .filter(|s| !s.handle.trim().is_empty())
        .filter(|s| seen.insert(s.handle.to_ascii_lowercase()))
        .cloned()
        .collect()
}

/// Arrival order is nondeterministic; dedupe and order by stable id before ranking.
fn canonical_order(mut items: Vec<CandidateItem>) -> Vec<CandidateItem> {
    items.sort_by(|a, b| a.stable_id.cmp(&b.stable_id));
    items.dedup_by(|a, b| a.stable_id == b.stable_id);
    items
}
