// src/analyze/mod.rs
//! Per-item analysis stages (classify, filter) and the final ranking.

pub mod classify;
pub mod filter;
pub mod rerank;

pub use classify::classify;
pub use filter::FilterConfig;
pub use rerank::rank;
