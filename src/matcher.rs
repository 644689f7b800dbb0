// src/matcher.rs
//! # Match Engine
//! Pure evaluation of entries against trigger rules. No I/O.
//!
//! Per (entry, rule):
//! 1. Normalize each of the rule's fields.
//! 2. Every keyword must be present (case-insensitive substring) within a
//!    single field; a phrase spanning two fields does not count.
//! 3. Any exclusion keyword found in a field rejects the entry.
//! 4. Confidence: each keyword earns the weight of the most important rule
//!    field it appears in, relative to the most important field the rule
//!    searches; the score is the mean over all keywords, capped at 1.0.
//! 5. A match is emitted only when confidence >= the rule's threshold.
//!
//! Rules never see each other's results, so an entry can match any number
//! of rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Field, TriggerRule};
use crate::ingest::types::Entry;

const SNIPPET_CHARS: usize = 160;
const SNIPPET_LEAD: usize = 60;
/// Slack for float error when comparing a score to its threshold.
const SCORE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub rule: String,
    pub entry_id: String,
    pub entry_title: String,
    pub entry_link: String,
    pub source: String,
    pub confidence: f32,
    pub matched_keywords: Vec<String>,
    pub snippet: String,
    pub matched_at: DateTime<Utc>,
}

/// Why an entry did not produce a match for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Disabled,
    MissingKeywords,
    Excluded,
    BelowThreshold,
}

#[derive(Debug, Clone)]
pub struct MatchEngine {
    rules: Vec<TriggerRule>,
}

impl MatchEngine {
    pub fn new(rules: Vec<TriggerRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[TriggerRule] {
        &self.rules
    }

    /// All rules an entry matches, in rule order.
    pub fn match_entry(&self, entry: &Entry, now: DateTime<Utc>) -> Vec<Match> {
        self.rules
            .iter()
            .filter_map(|r| evaluate(entry, r, now).ok())
            .collect()
    }

    pub fn match_batch(&self, entries: &[Entry], now: DateTime<Utc>) -> Vec<Match> {
        let mut out = Vec::new();
        for e in entries {
            for m in self.match_entry(e, now) {
                tracing::debug!(
                    rule = %m.rule,
                    entry = %m.entry_id,
                    confidence = m.confidence,
                    "rule matched"
                );
                out.push(m);
            }
        }
        out
    }
}

/// Evaluate one rule against one entry.
pub fn evaluate(entry: &Entry, rule: &TriggerRule, now: DateTime<Utc>) -> Result<Match, Rejection> {
    if !rule.enabled {
        return Err(Rejection::Disabled);
    }

    let texts = field_texts(entry, rule);
    let found = |k: &str| texts.iter().any(|(_, t)| t.contains(k));

    let keywords: Vec<String> = rule.keywords.iter().map(|k| normalize(k)).collect();
    if !keywords.iter().all(|k| found(k.as_str())) {
        return Err(Rejection::MissingKeywords);
    }

    if rule
        .exclude_keywords
        .iter()
        .map(|k| normalize(k))
        .any(|k| !k.is_empty() && found(k.as_str()))
    {
        return Err(Rejection::Excluded);
    }

    let confidence = score_texts(&texts, rule);
    if confidence + SCORE_EPSILON < rule.confidence_threshold {
        return Err(Rejection::BelowThreshold);
    }

    Ok(Match {
        rule: rule.name.clone(),
        entry_id: entry.id.clone(),
        entry_title: entry.title.clone(),
        entry_link: entry.link.clone(),
        source: entry.source.clone(),
        confidence,
        matched_keywords: rule.keywords.clone(),
        snippet: snippet(entry, rule),
        matched_at: now,
    })
}

/// Field-weighted keyword coverage in `0.0..=1.0`.
///
/// Defined for every entry (missing keywords earn 0), so it only grows as
/// keyword occurrences are added to the entry's text.
pub fn score(entry: &Entry, rule: &TriggerRule) -> f32 {
    score_texts(&field_texts(entry, rule), rule)
}

fn score_texts(texts: &[(Field, String)], rule: &TriggerRule) -> f32 {
    if rule.keywords.is_empty() {
        return 0.0;
    }
    let top = rule
        .fields
        .iter()
        .map(|f| f.weight())
        .fold(0.0f32, f32::max);
    if top <= 0.0 {
        return 0.0;
    }

    let mut acc = 0.0f64;
    for kw in &rule.keywords {
        let kw = normalize(kw);
        let best = texts
            .iter()
            .filter(|(_, t)| t.contains(kw.as_str()))
            .map(|(f, _)| f.weight())
            .fold(0.0f32, f32::max);
        acc += f64::from(best) / f64::from(top);
    }
    ((acc / rule.keywords.len() as f64) as f32).min(1.0)
}

fn field_texts(entry: &Entry, rule: &TriggerRule) -> Vec<(Field, String)> {
    rule.fields
        .iter()
        .map(|f| (*f, normalize(&field_text(entry, *f))))
        .collect()
}

fn field_text(entry: &Entry, f: Field) -> String {
    match f {
        Field::Title => entry.title.clone(),
        Field::Description => entry.description.clone(),
        Field::Tags => entry.tags.join(" "),
        Field::Link => entry.link.clone(),
    }
}

/// Lowercase + condensed whitespace, compared with plain `contains`.
fn normalize(input: &str) -> String {
    input
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Up to `SNIPPET_CHARS` of the most important field containing the first
/// keyword, starting a little before the hit.
fn snippet(entry: &Entry, rule: &TriggerRule) -> String {
    let Some(first) = rule.keywords.first().map(|k| normalize(k)) else {
        return String::new();
    };

    let mut fields = rule.fields.clone();
    fields.sort_by(|a, b| b.weight().total_cmp(&a.weight()));

    for f in fields {
        let display = field_text(entry, f)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let lower = display.to_lowercase();
        let Some(byte_idx) = lower.find(first.as_str()) else {
            continue;
        };
        // Lowercasing can change byte lengths outside ASCII; fall back to
        // the start of the field when offsets no longer line up.
        let hit_chars = if lower.len() == display.len() && display.is_char_boundary(byte_idx) {
            display[..byte_idx].chars().count()
        } else {
            0
        };
        let start = hit_chars.saturating_sub(SNIPPET_LEAD);
        let total = display.chars().count();
        let mut out: String = display.chars().skip(start).take(SNIPPET_CHARS).collect();
        if start > 0 {
            out.insert_str(0, "...");
        }
        if start + SNIPPET_CHARS < total {
            out.push_str("...");
        }
        return out;
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, 12, 0, 0).unwrap()
    }

    fn entry(title: &str, description: &str) -> Entry {
        Entry::new("feed", title, description, "https://example.com/x", now())
    }

    #[test]
    fn title_hits_outweigh_description_hits() {
        let rule = TriggerRule::new("r", &["deal"]);
        let in_title = score(&entry("A deal", ""), &rule);
        let in_desc = score(&entry("Nothing", "a deal"), &rule);
        assert!((in_title - 1.0).abs() < 1e-6);
        assert!((in_desc - 0.7).abs() < 1e-6);
    }

    #[test]
    fn single_field_rule_normalizes_to_one() {
        let rule = TriggerRule::new("r", &["deal"]).with_fields(&[Field::Description]);
        let s = score(&entry("", "great deal"), &rule);
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn whitespace_and_case_insensitive() {
        let rule = TriggerRule::new("r", &["flash   SALE"]);
        assert!(evaluate(&entry("FLASH\tsale now", ""), &rule, now()).is_ok());
    }

    #[test]
    fn disabled_rule_never_matches() {
        let mut rule = TriggerRule::new("r", &["deal"]);
        rule.enabled = false;
        assert_eq!(
            evaluate(&entry("deal", ""), &rule, now()),
            Err(Rejection::Disabled)
        );
    }

    #[test]
    fn below_threshold_is_rejected() {
        let rule = TriggerRule::new("r", &["deal"]).with_threshold(0.9);
        assert_eq!(
            evaluate(&entry("none", "deal in body"), &rule, now()),
            Err(Rejection::BelowThreshold)
        );
    }

    #[test]
    fn tags_are_searchable() {
        let rule = TriggerRule::new("r", &["gpu"])
            .with_fields(&[Field::Tags])
            .with_threshold(0.5);
        let e = entry("x", "y").with_tags(vec!["GPU".into(), "hardware".into()]);
        assert!(evaluate(&e, &rule, now()).is_ok());
    }

    #[test]
    fn many_description_keywords_meet_default_threshold() {
        for n in 1..=30 {
            let words: Vec<String> = (0..n).map(|i| format!("kw{i}z")).collect();
            let refs: Vec<&str> = words.iter().map(String::as_str).collect();
            let rule = TriggerRule::new("r", &refs);
            let e = entry("nothing here", &words.join(" "));
            let m = evaluate(&e, &rule, now());
            assert!(m.is_ok(), "{n} keywords: {m:?}");
        }
    }

    #[test]
    fn phrase_across_fields_is_not_present() {
        let rule = TriggerRule::new("r", &["deal sale"]).with_threshold(0.0);
        assert_eq!(
            evaluate(&entry("big deal", "sale today"), &rule, now()),
            Err(Rejection::MissingKeywords)
        );
        let m = evaluate(&entry("big deal sale", "today"), &rule, now()).unwrap();
        assert!((m.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn exclusion_is_checked_per_field() {
        let rule = TriggerRule::new("r", &["deal"])
            .with_excludes(&["fake offer"])
            .with_threshold(0.0);
        assert!(evaluate(&entry("deal fake", "offer inside"), &rule, now()).is_ok());
        assert_eq!(
            evaluate(&entry("deal", "a fake offer"), &rule, now()),
            Err(Rejection::Excluded)
        );
    }

    #[test]
    fn snippet_is_centered_on_first_keyword() {
        let long = format!("{} the deal is here {}", "x".repeat(200), "y".repeat(200));
        let rule = TriggerRule::new("r", &["deal"]).with_threshold(0.0);
        let m = evaluate(&entry(&long, ""), &rule, now()).unwrap();
        assert!(m.snippet.starts_with("..."));
        assert!(m.snippet.ends_with("..."));
        assert!(m.snippet.contains("the deal is here"));
    }
}
