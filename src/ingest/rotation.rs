// src/ingest/rotation.rs
//! Deterministic daily rotation over the source list.
//!
//! `offset = days_since_epoch(date) mod len`; the subset is the first `subset_size`
//! elements of the list rotated left by `offset`. The window slides one position
//! per day, so every source is visited within `len` consecutive days, without
//! any stored state.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::model::Source;

/// Calendar date of `now` in the reference zone.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Days since 1970-01-01 (negative before it).
pub fn epoch_day_number(date: NaiveDate) -> i64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
    (date - epoch).num_days()
}

/// Pure selection; `subset_size >= len` returns the whole list unrotated.
pub fn select(all: &[Source], date: NaiveDate, subset_size: usize) -> Vec<Source> {
    let len = all.len();
    if len == 0 || subset_size == 0 {
        return Vec::new();
    }
    if subset_size >= len {
        return all.to_vec();
    }
    let offset = epoch_day_number(date).rem_euclid(len as i64) as usize;
    all.iter()
        .cycle()
        .skip(offset)
        .take(subset_size)
        .cloned()
        .collect()
}
