// src/analyze/rerank.rs
//! Ranking: descending on the chosen metric, ties broken by newest first.
//!
//! - `recency` orders purely by `created_at` (desc).
//! - `priority_first` is a **stable partition** applied after the sort: priority
//!   items move ahead as a block; intra-group order is untouched.
//!
//! Both steps are stable, so items equal under the comparator keep their input
//! order. The engine pre-orders its buffer, which makes the output deterministic.

use std::cmp::Ordering;

use crate::config::SortKey;
use crate::model::CandidateItem;

fn metric(item: &CandidateItem, key: SortKey) -> u64 {
    match key {
        SortKey::Reposts => item.repost_count,
        SortKey::Likes => item.like_count,
        SortKey::Total => item.engagement(),
        SortKey::Recency => 0,
    }
}

pub fn compare(a: &CandidateItem, b: &CandidateItem, key: SortKey) -> Ordering {
    metric(b, key)
        .cmp(&metric(a, key))
        .then_with(|| b.created_at.cmp(&a.created_at))
}

pub fn rank(mut items: Vec<CandidateItem>, key: SortKey, priority_first: bool) -> Vec<CandidateItem> {
    items.sort_by(|a, b| compare(a, b, key));
    if priority_first {
        let (mut head, tail): (Vec<_>, Vec<_>) = items.into_iter().partition(|it| it.is_priority);
        head.extend(tail);
        head
    } else {
        items
    }
}
