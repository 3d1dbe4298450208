// src/error.rs
//! Error taxonomy for a stream run.
//!
//! Only [`RunError`] ever leaves [`crate::engine::Engine`]. [`FetchError`] and
//! [`MalformedItem`] are recovered inside the pipeline: the affected source or item
//! is dropped, counted, logged, and the run carries on.

use std::time::Duration;
use thiserror::Error;

/// Fatal outcome of a run. Partial failures never surface here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunError {
    /// Invalid run parameters; reported before any network work starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Every fetch task failed on its first page with an upstream error.
    #[error("upstream unavailable: all {failed_sources} source(s) failed")]
    UpstreamUnavailable { failed_sources: usize },
}

impl RunError {
    pub fn config(msg: impl Into<String>) -> Self {
        RunError::Configuration(msg.into())
    }
}

/// Failure of a single upstream call (page fetch or handle resolution).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Timeouts are end-of-stream; everything else counts as an upstream failure.
    pub fn is_upstream(&self) -> bool {
        !matches!(self, FetchError::Timeout(_))
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::Status { .. } => "status",
            FetchError::Decode(_) => "decode",
            FetchError::Timeout(_) => "timeout",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

/// Why a raw item could not become a candidate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedItem {
    #[error("item has no timestamp")]
    MissingTimestamp,

    #[error("unparsable timestamp `{0}`")]
    UnparsableTimestamp(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}
