use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::config::{RunConfig, SortKey, Tunables};
use crate::engine::Engine;
use crate::error::RunError;
use crate::ingest::sources::apply_overlay;
use crate::ingest::types::SourceSupplier;
use crate::metrics::Metrics;
use crate::model::{RunResult, Source};
use crate::overlay::{Watchlist, WatchlistOverlay};

/// CDN TTLs (seconds).
const STREAM_CDN_TTL: u32 = 300;
const REACTIONS_CDN_TTL: u32 = 180;

/// Reactions and watchlist look at the last few hours by default.
const FOCUSED_WINDOW_HOURS: u32 = 6;
const REACTIONS_MIN_REPOSTS: u64 = 5;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub tunables: Arc<Tunables>,
    pub sources: Arc<dyn SourceSupplier>,
    pub watchlist: Watchlist,
    /// Injected so tests can pin the run date.
    pub clock: fn() -> DateTime<Utc>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/stream", get(stream))
        .route("/api/reactions", get(reactions))
        .route("/api/watchlist", get(watchlist_stream))
        .route(
            "/api/watchlist-accounts",
            get(accounts_get)
                .post(accounts_add)
                .put(accounts_replace)
                .delete(accounts_remove),
        )
        .with_state(state)
        .merge(Metrics::init().router())
        .layer(CorsLayer::very_permissive())
}

// ---- errors ----

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl From<RunError> for ApiError {
    fn from(err: RunError) -> Self {
        let status = match err {
            RunError::Configuration(_) => StatusCode::BAD_REQUEST,
            RunError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(target: "api", status = self.status.as_u16(), error = %self.message, "request failed");
        let body = Json(json!({ "ok": false, "error": self.message }));
        no_store((self.status, body).into_response())
    }
}

// ---- cache headers ----

fn no_store(mut resp: Response) -> Response {
    resp.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

fn cdn_cacheable(mut resp: Response, cdn_ttl: u32) -> Response {
    let value = format!("public, max-age=60, s-maxage={cdn_ttl}, stale-while-revalidate=120");
    if let Ok(v) = HeaderValue::from_str(&value) {
        resp.headers_mut().insert(header::CACHE_CONTROL, v);
    }
    resp
}

#[derive(Serialize)]
struct StreamResponse {
    ok: bool,
    #[serde(flatten)]
    result: RunResult,
}

fn run_response(result: RunResult, params: &HashMap<String, String>, cdn_ttl: u32) -> Response {
    let resp = Json(StreamResponse { ok: true, result }).into_response();
    if flag(params, "nocache") == Some(true) {
        no_store(resp)
    } else {
        cdn_cacheable(resp, cdn_ttl)
    }
}

// ---- query parsing ----

fn flag(params: &HashMap<String, String>, key: &str) -> Option<bool> {
    params
        .get(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn number<T: FromStr>(params: &HashMap<String, String>, key: &str) -> Result<Option<T>, ApiError> {
    match params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("`{key}` must be a number, got `{v}`"))),
    }
}

// ---- per-endpoint baselines ----

fn stream_baseline(tunables: &Tunables) -> RunConfig {
    tunables.run_config()
}

/// Widely reposted originals from the last hours, most reposted first.
fn reactions_baseline(tunables: &Tunables) -> RunConfig {
    RunConfig {
        window_hours: FOCUSED_WINDOW_HOURS,
        min_reposts: REACTIONS_MIN_REPOSTS,
        sort_key: SortKey::Reposts,
        include_replies: false,
        include_quotes: false,
        ..tunables.run_config()
    }
}

/// Everything the listed accounts posted in the last hours, replies excluded, newest first.
fn watchlist_baseline(tunables: &Tunables) -> RunConfig {
    RunConfig {
        window_hours: FOCUSED_WINDOW_HOURS,
        sort_key: SortKey::Recency,
        include_replies: false,
        ..tunables.run_config()
    }
}

/// Endpoint baseline plus every query override shared by the three run endpoints.
fn run_config(base: RunConfig, params: &HashMap<String, String>) -> Result<RunConfig, ApiError> {
    let mut cfg = base;
    if let Some(q) = params.get("q") {
        cfg.tokens = RunConfig::parse_tokens(q);
    }
    if let Some(tz) = params.get("tz").map(|s| s.trim()).filter(|s| !s.is_empty()) {
        cfg.time_zone = tz.to_string();
    }
    if let Some(v) = number(params, "limitReporters")? {
        cfg.max_sources = v;
    }
    if let Some(v) = number(params, "hours")? {
        cfg.window_hours = v;
    }
    if let Some(v) = number(params, "minReposts")? {
        cfg.min_reposts = v;
    }
    if let Some(v) = number(params, "minLikes")? {
        cfg.min_likes = v;
    }
    if let Some(v) = number(params, "limit")? {
        cfg.limit = v;
    }
    if let Some(s) = params.get("sort").filter(|s| !s.trim().is_empty()) {
        cfg.sort_key = SortKey::from_str(s)?;
    }
    if let Some(b) = flag(params, "includeReplies") {
        cfg.include_replies = b;
    }
    if let Some(b) = flag(params, "includeQuotes") {
        cfg.include_quotes = b;
    }
    if let Some(b) = flag(params, "includeReposts") {
        cfg.include_reposts = b;
    }
    if let Some(b) = flag(params, "matchUrls") {
        cfg.match_in_urls = b;
    }
    if let Some(b) = flag(params, "matchQuoted") {
        cfg.match_in_quoted_text = b;
    }
    if let Some(b) = flag(params, "priorityFirst") {
        cfg.priority_first = b;
    }
    Ok(cfg)
}

// ---- run endpoints ----

async fn stream(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    if flag(&params, "ping") == Some(true) {
        return Ok(no_store(Json(json!({ "ok": true, "pong": true })).into_response()));
    }
    let cfg = run_config(stream_baseline(&state.tunables), &params)?;
    cfg.validate()?;

    let base = state.sources.load().await.map_err(|e| ApiError {
        status: StatusCode::BAD_GATEWAY,
        message: format!("reporter list unavailable: {e:#}"),
    })?;
    let overlay = match state.watchlist.get().await {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!(target: "api", error = %e, "watchlist overlay unreadable; using base list");
            WatchlistOverlay::default()
        }
    };
    let sources = apply_overlay(base, &overlay);

    let result = state.engine.run(&cfg, &sources, (state.clock)()).await?;
    Ok(run_response(result, &params, STREAM_CDN_TTL))
}

async fn reactions(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let query = params
        .get("q")
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("`q` is required"))?
        .to_string();
    let mut cfg = run_config(reactions_baseline(&state.tunables), &params)?;
    // upstream already matched the query
    cfg.tokens.clear();

    let result = state.engine.run_search(&cfg, &query, (state.clock)()).await?;
    Ok(run_response(result, &params, REACTIONS_CDN_TTL))
}

/// Explicit handle list, scanned without rotation. Never cached.
async fn watchlist_stream(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let sources: Vec<Source> = params
        .get("handles")
        .map(|h| {
            h.split(',')
                .map(Source::new)
                .filter(|s| !s.handle.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if sources.is_empty() {
        return Err(ApiError::bad_request("`handles` is required"));
    }
    let mut cfg = run_config(watchlist_baseline(&state.tunables), &params)?;
    cfg.max_sources = sources.len();

    let result = state.engine.run(&cfg, &sources, (state.clock)()).await?;
    Ok(no_store(Json(StreamResponse { ok: true, result }).into_response()))
}

// ---- overlay management ----

#[derive(Debug, Deserialize)]
struct AccountBody {
    handle: String,
    display: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoveBody {
    #[serde(default)]
    handle: String,
}

fn is_blank_handle(handle: &str) -> bool {
    handle.trim().trim_start_matches('@').is_empty()
}

fn overlay_response(overlay: WatchlistOverlay) -> Response {
    no_store(Json(json!({ "ok": true, "overlay": overlay })).into_response())
}

async fn accounts_get(State(state): State<AppState>) -> Result<Response, ApiError> {
    let overlay = state.watchlist.get().await.map_err(ApiError::internal)?;
    Ok(overlay_response(overlay))
}

async fn accounts_add(
    State(state): State<AppState>,
    Json(body): Json<AccountBody>,
) -> Result<Response, ApiError> {
    if is_blank_handle(&body.handle) {
        return Err(ApiError::bad_request("`handle` is required"));
    }
    let overlay = state
        .watchlist
        .add(&body.handle, body.display.as_deref())
        .await
        .map_err(ApiError::internal)?;
    tracing::info!(target: "api", handle = %body.handle, "watchlist account added");
    Ok(overlay_response(overlay))
}

/// Handle from `?handle=` or a `{"handle": ..}` JSON body.
async fn accounts_remove(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let parsed: RemoveBody = serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?;
        Some(parsed.handle)
    };
    let handle = params
        .get("handle")
        .cloned()
        .filter(|h| !is_blank_handle(h))
        .or(from_body)
        .filter(|h| !is_blank_handle(h))
        .ok_or_else(|| ApiError::bad_request("`handle` is required"))?;
    let overlay = state
        .watchlist
        .remove(&handle)
        .await
        .map_err(ApiError::internal)?;
    tracing::info!(target: "api", handle = %handle, "watchlist account removed");
    Ok(overlay_response(overlay))
}

async fn accounts_replace(
    State(state): State<AppState>,
    Json(body): Json<WatchlistOverlay>,
) -> Result<Response, ApiError> {
    let overlay = state
        .watchlist
        .replace(body)
        .await
        .map_err(ApiError::internal)?;
    Ok(overlay_response(overlay))
}
