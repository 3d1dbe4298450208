// src/config/tunables.rs
//! Process-wide tunables: loaded once at startup from TOML, overridable via env.
//!
//! Lookup order for the file:
//! 1) $STREAM_CONFIG_PATH (must exist if set)
//! 2) config/stream.toml
//! 3) built-in defaults

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::run::RunConfig;

pub const ENV_CONFIG_PATH: &str = "STREAM_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/stream.toml";

const ENV_CONCURRENCY: &str = "CONCURRENCY";
const ENV_MAX_REPORTERS: &str = "MAX_REPORTERS";
const ENV_TIMEZONE: &str = "TIMEZONE";
const ENV_REPORTERS_CSV_URL: &str = "REPORTERS_CSV_URL";
const ENV_REPORTERS_CSV_PATH: &str = "REPORTERS_CSV_PATH";
const ENV_WATCHLIST_STORE_PATH: &str = "WATCHLIST_STORE_PATH";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Tunables {
    pub concurrency: usize,
    pub max_reporters: usize,
    pub time_zone: String,
    pub global_deadline_ms: u64,
    pub per_request_timeout_ms: u64,
    pub page_size: u32,
    pub window_hours: u32,
    pub limit: usize,
    pub utm_source: Option<String>,
    pub reporters_csv_path: PathBuf,
    pub reporters_csv_url: Option<String>,
    pub watchlist_store_path: PathBuf,
    pub appview_base: String,
}

impl Default for Tunables {
    fn default() -> Self {
        let run = RunConfig::default();
        Self {
            concurrency: run.concurrency_limit,
            max_reporters: run.max_sources,
            time_zone: run.time_zone,
            global_deadline_ms: run.global_deadline_ms,
            per_request_timeout_ms: run.per_request_timeout_ms,
            page_size: run.page_size,
            window_hours: run.window_hours,
            limit: run.limit,
            utm_source: run.utm_source,
            reporters_csv_path: PathBuf::from("config/reporters.csv"),
            reporters_csv_url: None,
            watchlist_store_path: PathBuf::from("data/watchlist.json"),
            appview_base: "https://public.api.bsky.app".to_string(),
        }
    }
}

impl Tunables {
    /// Parse from a TOML string; absent keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing stream tunables")
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading tunables from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// File lookup (env → default path → built-ins), then env overrides.
    pub fn load_default() -> Result<Self> {
        let mut t = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from(&default_p)?
            } else {
                Self::default()
            }
        };
        t.apply_env();
        Ok(t)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse::<usize>(ENV_CONCURRENCY) {
            self.concurrency = v;
        }
        if let Some(v) = env_parse::<usize>(ENV_MAX_REPORTERS) {
            self.max_reporters = v;
        }
        if let Ok(v) = std::env::var(ENV_TIMEZONE) {
            if !v.trim().is_empty() {
                self.time_zone = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var(ENV_REPORTERS_CSV_URL) {
            if !v.trim().is_empty() {
                self.reporters_csv_url = Some(v.trim().to_string());
            }
        }
        if let Ok(v) = std::env::var(ENV_REPORTERS_CSV_PATH) {
            self.reporters_csv_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(ENV_WATCHLIST_STORE_PATH) {
            self.watchlist_store_path = PathBuf::from(v);
        }
    }

    /// Baseline `RunConfig` the HTTP layer starts from before applying query params.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            concurrency_limit: self.concurrency,
            max_sources: self.max_reporters,
            time_zone: self.time_zone.clone(),
            global_deadline_ms: self.global_deadline_ms,
            per_request_timeout_ms: self.per_request_timeout_ms,
            page_size: self.page_size,
            window_hours: self.window_hours,
            limit: self.limit,
            utm_source: self.utm_source.clone(),
            ..RunConfig::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
