// src/analyze/classify.rs
//! Item kind with a fixed precedence: repost > reply > quote > original.
//!
//! A single entry can satisfy several conditions (a repost of a quote, a reply
//! that quotes); the first match in that order wins.

use crate::model::{ItemKind, RawItem};

pub fn classify(raw: &RawItem) -> ItemKind {
    let reposted = raw
        .repost_by
        .as_ref()
        .is_some_and(|by| !by.did.is_empty());
    if reposted {
        ItemKind::Repost
    } else if raw.reply_parent.as_deref().is_some_and(|p| !p.is_empty()) {
        ItemKind::Reply
    } else if raw.quote.is_some() {
        ItemKind::Quote
    } else {
        ItemKind::Original
    }
}
