// src/assemble.rs
//! Truncation plus presentation-only fields. Never reorders.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::Url;

use crate::model::{CandidateItem, ResultItem, RunResult};

/// `Mar 4, 2025, 9:05 PM`
pub const LOCAL_TS_FORMAT: &str = "%b %-d, %Y, %-I:%M %p";

#[derive(Debug, Clone)]
pub struct ResultAssembler {
    pub limit: usize,
    pub time_zone: Tz,
    pub utm_source: Option<String>,
}

impl ResultAssembler {
    pub fn assemble(
        &self,
        ranked: Vec<CandidateItem>,
        scanned_source_count: usize,
        elapsed_ms: u64,
    ) -> RunResult {
        let items = ranked
            .into_iter()
            .take(self.limit)
            .map(|item| self.decorate(item))
            .collect();
        RunResult {
            items,
            scanned_source_count,
            elapsed_ms,
        }
    }

    fn decorate(&self, item: CandidateItem) -> ResultItem {
        ResultItem {
            url: with_utm(&item.permalink, self.utm_source.as_deref()),
            ts_local: local_timestamp(item.created_at, self.time_zone),
            html: text_to_html(&item.text),
            item,
        }
    }
}

/// Appends `utm_source`; an unparsable link is returned as is.
pub fn with_utm(permalink: &str, utm_source: Option<&str>) -> String {
    let Some(source) = utm_source.filter(|s| !s.is_empty()) else {
        return permalink.to_string();
    };
    match Url::parse(permalink) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("utm_source", source);
            url.to_string()
        }
        Err(_) => permalink.to_string(),
    }
}

pub fn local_timestamp(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format(LOCAL_TS_FORMAT).to_string()
}

/// Escaped text with line breaks as `<br>`.
pub fn text_to_html(text: &str) -> String {
    html_escape::encode_safe(text)
        .replace("\r\n", "\n")
        .replace('\n', "<br>")
}
