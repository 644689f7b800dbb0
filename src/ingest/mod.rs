// src/ingest/mod.rs
pub mod dedupe;
pub mod filter;
pub mod providers;
pub mod rate_limit;
pub mod types;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::FetchError;
use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::types::{Entry, FeedSource};

/// One-time metrics registration.
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_entries_total",
            "Entries parsed from sources after item filtering."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Source fetch/parse errors."
        );
        describe_counter!(
            "ingest_rate_limited_total",
            "Source fetches skipped by the per-source rate limit."
        );
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_counter!(
            "store_duplicates_total",
            "Entries rejected as duplicates within the dedupe window."
        );
        describe_counter!("matcher_matches_total", "Rule matches emitted.");
        describe_counter!(
            "dispatch_failures_total",
            "Actions whose notifier failed or was not configured."
        );
        describe_counter!(
            "scheduler_cycles_total",
            "Completed or aborted scheduler cycles, by outcome."
        );
    });
}

/// Normalize feed text: decode entities, strip tags, ASCII quotes,
/// collapse whitespace, cap to `max_chars` (appending "...").
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| {
        regex::Regex::new(r"(?is)</?[a-z!][^>]*>").expect("static tag regex")
    });
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("static ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect::<String>().trim_end().to_string();
        out.push_str("...");
    }

    out
}

/// Entries from one source, in fetch order.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: String,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub batches: Vec<SourceBatch>,
    pub failures: Vec<FetchError>,
    pub rate_limited: Vec<String>,
}

impl FetchOutcome {
    pub fn total_entries(&self) -> usize {
        self.batches.iter().map(|b| b.entries.len()).sum()
    }
}

/// Fetch every source whose rate limit allows it at `now`, at most
/// `max_concurrent` at a time. A failing source is logged and reported in
/// `failures`; it never aborts the others. Batches come back in source order.
pub async fn fetch_all(
    sources: &[Arc<dyn FeedSource>],
    limiter: &mut RateLimiter,
    now: DateTime<Utc>,
    max_concurrent: usize,
) -> FetchOutcome {
    ensure_metrics_described();

    let mut outcome = FetchOutcome::default();
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut set = JoinSet::new();
    let mut pending: HashMap<usize, String> = HashMap::new();

    for (idx, src) in sources.iter().enumerate() {
        let name = src.name().to_string();
        if !limiter.is_allowed(&name, now) {
            tracing::debug!(
                source = %name,
                next_allowed = ?limiter.next_allowed(&name),
                "rate limited, skipping this cycle"
            );
            counter!("ingest_rate_limited_total").increment(1);
            outcome.rate_limited.push(name);
            continue;
        }
        limiter.record_fetch(&name, now, src.rate_limit_secs());

        let src = Arc::clone(src);
        let permits = Arc::clone(&permits);
        set.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            (idx, src.fetch_latest().await)
        });
        pending.insert(idx, name);
    }

    let mut done: Vec<(usize, String, Vec<Entry>)> = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, Ok(entries))) => {
                let name = pending.remove(&idx).unwrap_or_default();
                tracing::info!(source = %name, entries = entries.len(), "fetched source");
                done.push((idx, name, entries));
            }
            Ok((idx, Err(e))) => {
                pending.remove(&idx);
                tracing::warn!(source = %e.source_name(), error = %e, "source fetch failed, skipping");
                counter!("ingest_source_errors_total").increment(1);
                outcome.failures.push(e);
            }
            Err(join_err) => {
                // Attributed below: the panicked task's index stays in `pending`.
                tracing::error!(error = %join_err, "source task aborted");
            }
        }
    }
    let mut orphaned: Vec<(usize, String)> = pending.into_iter().collect();
    orphaned.sort_by_key(|(idx, _)| *idx);
    for (_, name) in orphaned {
        counter!("ingest_source_errors_total").increment(1);
        outcome.failures.push(FetchError::Task {
            source_name: name,
            message: "fetch task panicked or was cancelled".to_string(),
        });
    }

    done.sort_by_key(|(idx, _, _)| *idx);
    outcome.batches = done
        .into_iter()
        .map(|(_, source, entries)| SourceBatch { source, entries })
        .collect();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_markup_and_collapses_ws() {
        let s = "  <p>Hello,&nbsp;&nbsp; <b>world</b></p>  ";
        assert_eq!(normalize_text(s, 500), "Hello, world");
    }

    #[test]
    fn normalize_text_keeps_comparisons() {
        assert_eq!(normalize_text("price < 20 and > 5", 500), "price < 20 and > 5");
    }

    #[test]
    fn normalize_text_caps_length() {
        let long = "a".repeat(600);
        let out = normalize_text(&long, 500);
        assert_eq!(out.chars().count(), 503);
        assert!(out.ends_with("..."));
    }
}
