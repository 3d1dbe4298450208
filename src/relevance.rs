// src/relevance.rs
//! Query matching: text normalization plus precompiled, boundary-aware token rules.
//!
//! Normalization (applied to both text and tokens):
//! 1) remove URL-shaped substrings (unless URLs are searchable)
//! 2) lowercase
//! 3) Unicode NFD, then drop combining marks ("Dončić" → "doncic")
//! 4) collapse whitespace, trim
//!
//! Token rules:
//! - a token of ≤ 3 chars, or containing whitespace, needs a character that is
//!   not a letter, digit or `_` (or a string edge) on both sides;
//! - longer single-word tokens use regex word boundaries.
//!
//! Tokens are OR-ed. An empty token list matches everything.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::config::RunConfig;
use crate::error::RunError;
use crate::model::CandidateItem;

static RE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("url regex"));

/// Tokens at or below this many chars get the strict boundary rule.
const SHORT_TOKEN_CHARS: usize = 3;

// Dev logging gate: STREAM_DEV_LOG=1 AND dev env (debug or SHUTTLE_ENV in {local,development,dev})
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var("STREAM_DEV_LOG").ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("SHUTTLE_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Never logs raw text, only a hashed id.
fn dev_log_match(text: &str, matched: Option<&str>) {
    if !dev_logging_enabled() {
        return;
    }
    let id = anon_hash(text);
    info!(target: "relevance", %id, matched = matched.unwrap_or("-"), "token match evaluated");
}

pub fn strip_urls(text: &str) -> String {
    RE_URL.replace_all(text, " ").into_owned()
}

/// Lowercase, fold diacritics, collapse whitespace. URLs are removed unless `keep_urls`.
pub fn normalize_text(text: &str, keep_urls: bool) -> String {
    let text = if keep_urls {
        text.to_string()
    } else {
        strip_urls(text)
    };
    let folded: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// What to match and where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySpec {
    pub tokens: Vec<String>,
    pub match_in_urls: bool,
    pub match_in_quoted_text: bool,
}

impl QuerySpec {
    pub fn from_run_config(cfg: &RunConfig) -> Self {
        Self {
            tokens: cfg.tokens.clone(),
            match_in_urls: cfg.match_in_urls,
            match_in_quoted_text: cfg.match_in_quoted_text,
        }
    }
}

#[derive(Debug)]
struct TokenRule {
    token: String,
    re: Regex,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn compile_token(token: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(token);
    let strict = token.chars().count() <= SHORT_TOKEN_CHARS || token.contains(' ');
    let pattern = if strict {
        format!(r"(?:^|[^\p{{L}}\p{{N}}_]){escaped}(?:[^\p{{L}}\p{{N}}_]|$)")
    } else {
        // \b only makes sense next to a word character
        let lead = if token.starts_with(is_word_char) { r"\b" } else { "" };
        let trail = if token.ends_with(is_word_char) { r"\b" } else { "" };
        format!("{lead}{escaped}{trail}")
    };
    Regex::new(&pattern)
}

/// Compiled once per run and shared by every task.
#[derive(Debug)]
pub struct QueryMatcher {
    rules: Vec<TokenRule>,
    match_in_urls: bool,
    match_in_quoted_text: bool,
}

impl QueryMatcher {
    pub fn compile(spec: &QuerySpec) -> Result<Self, RunError> {
        let mut rules = Vec::with_capacity(spec.tokens.len());
        for raw in &spec.tokens {
            let token = normalize_text(raw, true);
            if token.is_empty() || rules.iter().any(|r: &TokenRule| r.token == token) {
                continue;
            }
            let re = compile_token(&token)
                .map_err(|e| RunError::config(format!("query token `{raw}`: {e}")))?;
            rules.push(TokenRule { token, re });
        }
        Ok(Self {
            rules,
            match_in_urls: spec.match_in_urls,
            match_in_quoted_text: spec.match_in_quoted_text,
        })
    }

    /// Matches everything.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First token found in `text`, if any.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        let normalized = normalize_text(text, self.match_in_urls);
        self.rules
            .iter()
            .find(|r| r.re.is_match(&normalized))
            .map(|r| r.token.as_str())
    }

    pub fn matches(&self, text: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        let hit = self.first_match(text);
        dev_log_match(text, hit);
        hit.is_some()
    }

    /// Post text first; the quoted post is an alternate source when enabled.
    /// A repost's text is already the wrapped post's text.
    pub fn matches_candidate(&self, item: &CandidateItem) -> bool {
        if self.matches(&item.text) {
            return true;
        }
        self.match_in_quoted_text
            && item
                .quoted_text
                .as_deref()
                .is_some_and(|quoted| self.matches(quoted))
    }
}

/// One-shot form; prefer [`QueryMatcher::compile`] when matching many items.
pub fn matches(text: &str, spec: &QuerySpec) -> Result<bool, RunError> {
    Ok(QueryMatcher::compile(spec)?.matches(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(tokens: &[&str]) -> QueryMatcher {
        QueryMatcher::compile(&QuerySpec {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn normalization_folds_case_diacritics_and_space() {
        assert_eq!(normalize_text("  Luka   DONČIĆ\n scores ", false), "luka doncic scores");
        assert_eq!(normalize_text("Nikola Jokić", false), "nikola jokic");
    }

    #[test]
    fn urls_are_removed_unless_requested() {
        let t = "Read this https://example.com/kd-trade now";
        assert_eq!(normalize_text(t, false), "read this now");
        assert!(normalize_text(t, true).contains("example.com/kd-trade"));
    }

    #[test]
    fn diacritic_insensitive_both_ways() {
        assert!(matcher(&["doncic"]).matches("Dončić drops 40"));
        assert!(matcher(&["Dončić"]).matches("doncic drops 40"));
    }

    #[test]
    fn short_token_needs_boundaries() {
        let m = matcher(&["KD"]);
        assert!(m.matches("KD to the Suns?"));
        assert!(m.matches("Trade talks (KD) heating up"));
        assert!(m.matches("sources: kd"));
        assert!(!m.matches("a backdoor cut for the layup"));
        assert!(!m.matches("kdrama night"));
        assert!(!m.matches("shoutout to kd_fan and co"));
    }

    #[test]
    fn long_token_uses_word_boundaries() {
        let m = matcher(&["lakers"]);
        assert!(m.matches("The Lakers won."));
        assert!(!m.matches("follow lakersnation for more"));
    }

    #[test]
    fn multi_word_token_matches_as_phrase() {
        let m = matcher(&["James Harden"]);
        assert!(m.matches("Sources: james   harden is available"));
        assert!(!m.matches("LeBron James and a harden stance"));
    }

    #[test]
    fn tokens_are_ored_and_empty_matches_all() {
        let m = matcher(&["celtics", "knicks"]);
        assert!(m.matches("Knicks are interested"));
        assert!(!m.matches("Heat are interested"));
        assert!(matcher(&[]).matches("anything"));
        assert!(matcher(&["  "]).is_empty());
    }

    #[test]
    fn token_inside_url_is_ignored_by_default() {
        let text = "Details at https://news.example.com/celtics-deal";
        assert!(!matcher(&["celtics"]).matches(text));

        let in_urls = QueryMatcher::compile(&QuerySpec {
            tokens: vec!["celtics".into()],
            match_in_urls: true,
            ..Default::default()
        })
        .unwrap();
        assert!(in_urls.matches(text));
    }

    #[test]
    fn quoted_text_is_alternate_source_when_enabled() {
        let item = CandidateItem {
            stable_id: "at://q".into(),
            uri: "at://q".into(),
            author_did: "did:plc:q".into(),
            author_handle: "q.bsky.social".into(),
            author_display_name: "Q".into(),
            author_avatar: None,
            created_at: chrono::Utc::now(),
            kind: crate::model::ItemKind::Quote,
            text: "This is big".into(),
            quoted_text: Some("Warriors acquire a guard".into()),
            reposted_by: None,
            like_count: 0,
            repost_count: 0,
            reply_count: 0,
            permalink: String::new(),
            first_media: None,
            is_priority: false,
        };
        let spec = QuerySpec {
            tokens: vec!["warriors".into()],
            ..Default::default()
        };
        assert!(!QueryMatcher::compile(&spec).unwrap().matches_candidate(&item));

        let spec = QuerySpec {
            match_in_quoted_text: true,
            ..spec
        };
        assert!(QueryMatcher::compile(&spec).unwrap().matches_candidate(&item));
    }

    #[test]
    fn one_shot_helper() {
        let spec = QuerySpec {
            tokens: vec!["bucks".into()],
            ..Default::default()
        };
        assert_eq!(matches("Bucks win", &spec), Ok(true));
    }

    #[test]
    fn anon_hash_is_short_hex() {
        let h = anon_hash("secret text");
        assert_eq!(h.len(), 12);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
