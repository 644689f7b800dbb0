// src/dispatch/alerts.rs
//! Per-agent alert rows (arbitrage, competitive intel, jobs, trends) built
//! from a match. Field extraction is heuristic and best-effort: anything
//! not found is stored as NULL.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;

use super::ActionType;
use crate::matcher::Match;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    Arbitrage {
        source: String,
        title: String,
        url: String,
        description: String,
        price: Option<String>,
        location: Option<String>,
    },
    CompetitiveIntel {
        source: String,
        data_type: String,
        content: String,
    },
    Job {
        source: String,
        job_title: String,
        company: Option<String>,
        location: Option<String>,
        url: String,
        salary_range: Option<String>,
    },
    Trend {
        source: String,
        trend_type: String,
        trend_name: Option<String>,
        data: String,
    },
}

impl Alert {
    /// Alert row for an alert-type action; `None` for every other action.
    pub fn from_match(action: ActionType, m: &Match) -> Option<Self> {
        let text = format!("{} {}", m.entry_title, m.snippet);
        match action {
            ActionType::ArbitrageAlert => Some(Alert::Arbitrage {
                source: m.source.clone(),
                title: m.entry_title.clone(),
                url: m.entry_link.clone(),
                description: m.snippet.clone(),
                price: extract_price(&text),
                location: extract_location(&text),
            }),
            ActionType::CompetitiveIntel => Some(Alert::CompetitiveIntel {
                source: m.source.clone(),
                data_type: m.rule.clone(),
                content: serde_json::json!({
                    "title": m.entry_title,
                    "url": m.entry_link,
                    "snippet": m.snippet,
                    "confidence": m.confidence,
                })
                .to_string(),
            }),
            ActionType::JobAlert => Some(Alert::Job {
                source: m.source.clone(),
                job_title: job_title(&m.entry_title),
                company: extract_company(&m.entry_title),
                location: extract_location(&text),
                url: m.entry_link.clone(),
                salary_range: extract_salary(&text),
            }),
            ActionType::TrendAlert => Some(Alert::Trend {
                source: m.source.clone(),
                trend_type: m.rule.clone(),
                trend_name: m.matched_keywords.first().cloned(),
                data: serde_json::json!({
                    "title": m.entry_title,
                    "url": m.entry_link,
                    "keywords": m.matched_keywords,
                    "confidence": m.confidence,
                })
                .to_string(),
            }),
            ActionType::Log | ActionType::Discord | ActionType::Slack | ActionType::Email => None,
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Alert::Arbitrage { .. } => "arbitrage_alerts",
            Alert::CompetitiveIntel { .. } => "competitive_intel",
            Alert::Job { .. } => "job_alerts",
            Alert::Trend { .. } => "trend_alerts",
        }
    }
}

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static alert regex"))
}

pub(crate) fn extract_price(text: &str) -> Option<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    re(&RE, r"[$€£]\s?\d[\d,]*(?:\.\d{1,2})?")
        .find(text)
        .map(|m| m.as_str().replace(' ', ""))
}

pub(crate) fn extract_salary(text: &str) -> Option<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    re(
        &RE,
        r"(?i)[$€£]\s?\d[\d,]*(?:\.\d+)?k?\s*(?:-|–|to)\s*[$€£]?\s?\d[\d,]*(?:\.\d+)?k?",
    )
    .find(text)
    .map(|m| m.as_str().to_string())
}

pub(crate) fn extract_location(text: &str) -> Option<String> {
    static RE_REMOTE: OnceCell<Regex> = OnceCell::new();
    if re(&RE_REMOTE, r"(?i)\bremote\b").is_match(text) {
        return Some("Remote".to_string());
    }
    static RE_IN: OnceCell<Regex> = OnceCell::new();
    re(&RE_IN, r"\bin ([A-Z][A-Za-z.\-]+(?:,? [A-Z][A-Za-z.\-]+){0,2})")
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches(',').to_string())
}

/// "Senior Rust Engineer at Acme Corp - Berlin" -> "Acme Corp"
pub(crate) fn extract_company(title: &str) -> Option<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    re(&RE, r"\bat ([A-Z][\w&.\-]*(?: [A-Z][\w&.\-]*){0,3})")
        .captures(title)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn job_title(title: &str) -> String {
    match title.find(" at ") {
        Some(i) => title[..i].trim().to_string(),
        None => title.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn m(title: &str, snippet: &str) -> Match {
        Match {
            rule: "jobs".into(),
            entry_id: "abc".into(),
            entry_title: title.into(),
            entry_link: "https://example.com/j".into(),
            source: "board".into(),
            confidence: 1.0,
            matched_keywords: vec!["rust".into()],
            snippet: snippet.into(),
            matched_at: Utc::now(),
        }
    }

    #[test]
    fn job_fields_are_extracted() {
        let a = Alert::from_match(
            ActionType::JobAlert,
            &m("Senior Rust Engineer at Acme Corp", "Remote, pays $120k - $150k"),
        )
        .unwrap();
        match a {
            Alert::Job {
                job_title,
                company,
                location,
                salary_range,
                ..
            } => {
                assert_eq!(job_title, "Senior Rust Engineer");
                assert_eq!(company.as_deref(), Some("Acme Corp"));
                assert_eq!(location.as_deref(), Some("Remote"));
                assert_eq!(salary_range.as_deref(), Some("$120k - $150k"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn price_and_city() {
        assert_eq!(extract_price("now $ 1,199.99 only").as_deref(), Some("$1,199.99"));
        assert_eq!(
            extract_location("pickup in San Francisco today").as_deref(),
            Some("San Francisco")
        );
        assert!(extract_price("no price").is_none());
    }

    #[test]
    fn notify_actions_have_no_alert_row() {
        assert!(Alert::from_match(ActionType::Discord, &m("x", "y")).is_none());
    }
}
