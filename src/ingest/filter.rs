// src/ingest/filter.rs
//! Per-feed item filter applied right after parsing, before the store.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::{Regex, RegexBuilder};

use crate::config::FilterConfig;
use crate::error::ConfigError;

use super::types::Entry;

#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    max_age: Option<ChronoDuration>,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    required_tags: Vec<String>,
    exclude_tags: Vec<String>,
}

impl ItemFilter {
    pub fn from_config(feed: &str, cfg: &FilterConfig) -> Result<Self, ConfigError> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>, ConfigError> {
            patterns
                .iter()
                .map(|p| {
                    RegexBuilder::new(p)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| {
                            ConfigError::Invalid(format!("feed {feed}: bad pattern {p:?}: {e}"))
                        })
                })
                .collect()
        };

        Ok(Self {
            max_age: cfg
                .max_age_days
                .filter(|d| *d > 0)
                .map(|d| ChronoDuration::days(i64::from(d))),
            include: compile(&cfg.include_patterns)?,
            exclude: compile(&cfg.exclude_patterns)?,
            required_tags: lower_all(&cfg.required_tags),
            exclude_tags: lower_all(&cfg.exclude_tags),
        })
    }

    /// Returns the kept entries and how many were dropped.
    pub fn apply(&self, entries: Vec<Entry>, now: DateTime<Utc>) -> (Vec<Entry>, usize) {
        let before = entries.len();
        let kept: Vec<Entry> = entries.into_iter().filter(|e| self.keep(e, now)).collect();
        let dropped = before - kept.len();
        (kept, dropped)
    }

    fn keep(&self, e: &Entry, now: DateTime<Utc>) -> bool {
        if let Some(max_age) = self.max_age {
            if e.published < now - max_age {
                return false;
            }
        }

        let tags = lower_all(&e.tags);
        if !self.required_tags.iter().all(|t| tags.contains(t)) {
            return false;
        }
        if self.exclude_tags.iter().any(|t| tags.contains(t)) {
            return false;
        }

        let hit = |re: &Regex| re.is_match(&e.title) || re.is_match(&e.description);
        if !self.include.is_empty() && !self.include.iter().any(hit) {
            return false;
        }
        if self.exclude.iter().any(hit) {
            return false;
        }
        true
    }
}

fn lower_all(v: &[String]) -> Vec<String> {
    v.iter().map(|s| s.trim().to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(title: &str, tags: &[&str], age_days: i64, now: DateTime<Utc>) -> Entry {
        Entry::new(
            "test",
            title,
            "",
            format!("https://example.com/{}", title.len()),
            now - ChronoDuration::days(age_days),
        )
        .with_tags(tags.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn drops_old_spam_and_unmatched() {
        let now = Utc.with_ymd_and_hms(2026, 2, 16, 12, 0, 0).unwrap();
        let cfg = FilterConfig {
            max_age_days: Some(7),
            include_patterns: vec!["deal".into(), "discount".into()],
            exclude_tags: vec!["Spam".into()],
            ..Default::default()
        };
        let f = ItemFilter::from_config("t", &cfg).unwrap();

        let items = vec![
            entry("Great Deal on GPU", &["hardware"], 0, now),
            entry("Deal of the week", &["spam"], 0, now),
            entry("Old deal", &[], 10, now),
            entry("Used book, good condition", &[], 0, now),
            entry("Student DISCOUNT", &[], 1, now),
        ];
        let (kept, dropped) = f.apply(items, now);
        assert_eq!(dropped, 3);
        let titles: Vec<_> = kept.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Great Deal on GPU", "Student DISCOUNT"]);
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let cfg = FilterConfig {
            exclude_patterns: vec!["(unclosed".into()],
            ..Default::default()
        };
        assert!(matches!(
            ItemFilter::from_config("t", &cfg),
            Err(ConfigError::Invalid(_))
        ));
    }
}
