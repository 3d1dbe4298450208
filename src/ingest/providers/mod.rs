// src/ingest/providers/mod.rs
pub mod bsky;

pub use bsky::BskyClient;
