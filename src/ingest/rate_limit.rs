// src/ingest/rate_limit.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;

/// Tracks the earliest time each source may be fetched again.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    next_allowed: HashMap<String, DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_allowed(&self, source: &str, now: DateTime<Utc>) -> bool {
        match self.next_allowed.get(source) {
            None => true,
            Some(ts) => now >= *ts,
        }
    }

    /// Record a fetch attempt (successful or not) at `now`.
    pub fn record_fetch(&mut self, source: &str, now: DateTime<Utc>, spacing_secs: u64) {
        // Capped at ~10 years so the chrono duration cannot overflow.
        let secs = i64::try_from(spacing_secs.min(315_360_000)).unwrap_or(0);
        let spacing = ChronoDuration::seconds(secs);
        self.next_allowed.insert(source.to_string(), now + spacing);
    }

    pub fn next_allowed(&self, source: &str) -> Option<DateTime<Utc>> {
        self.next_allowed.get(source).copied()
    }
}
