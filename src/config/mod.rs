// src/config/mod.rs
//! Run configuration (per invocation) and service tunables (per process).

pub mod run;
pub mod tunables;

pub use run::{RunConfig, SortKey, MAX_LIMIT};
pub use tunables::Tunables;
