// src/dispatch/mod.rs
//! # Action Dispatch
//! Turns matches into actions and carries them out.
//!
//! Every rule lists its action types. For each match, one [`Action`] per
//! listed type is planned and then executed:
//! - `log` writes a structured log line,
//! - notify types (`discord`, `slack`, `email`) go through the
//!   [`NotifierRegistry`],
//! - alert types write an agent-specific row (see [`alerts`]).
//!
//! Actions are executed independently: a failing notifier is recorded on the
//! action row and in the report, and the remaining actions still run.
//! Execution never touches the store; [`persist_actions`] writes the action
//! and alert rows through the caller's [`CycleWriter`]. In dry-run mode
//! actions are planned and logged, never persisted or sent.

pub mod alerts;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::TriggerRule;
use crate::error::{DispatchError, StorageError};
use crate::ingest::ensure_metrics_described;
use crate::matcher::Match;
use crate::notify::{NotificationEvent, NotifierRegistry};
use crate::store::CycleWriter;

pub use alerts::Alert;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Log,
    Discord,
    Slack,
    Email,
    ArbitrageAlert,
    CompetitiveIntel,
    JobAlert,
    TrendAlert,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Log => "log",
            ActionType::Discord => "discord",
            ActionType::Slack => "slack",
            ActionType::Email => "email",
            ActionType::ArbitrageAlert => "arbitrage_alert",
            ActionType::CompetitiveIntel => "competitive_intel",
            ActionType::JobAlert => "job_alert",
            ActionType::TrendAlert => "trend_alert",
        }
    }

    pub fn is_notify(self) -> bool {
        matches!(
            self,
            ActionType::Discord | ActionType::Slack | ActionType::Email
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A planned side effect of one match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    /// Row id of the stored match; set when the action is persisted.
    pub match_id: Option<i64>,
    pub rule: String,
    pub action_type: ActionType,
    pub payload: serde_json::Value,
    /// Row for alert-type actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub planned: usize,
    pub persisted: usize,
    pub notified: usize,
    pub alerts: usize,
    pub failures: Vec<DispatchError>,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.planned += other.planned;
        self.persisted += other.persisted;
        self.notified += other.notified;
        self.alerts += other.alerts;
        self.failures.extend(other.failures);
    }
}

pub struct Dispatcher {
    actions_by_rule: HashMap<String, Vec<ActionType>>,
    notifiers: NotifierRegistry,
    dry_run: bool,
}

impl Dispatcher {
    pub fn new(rules: &[TriggerRule], notifiers: NotifierRegistry, dry_run: bool) -> Self {
        let actions_by_rule = rules
            .iter()
            .map(|r| (r.name.clone(), r.actions.clone()))
            .collect();
        Self {
            actions_by_rule,
            notifiers,
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// One action per action type of the match's rule, in rule order.
    pub fn plan(&self, match_id: Option<i64>, m: &Match, now: DateTime<Utc>) -> Vec<Action> {
        let Some(types) = self.actions_by_rule.get(&m.rule) else {
            tracing::warn!(rule = %m.rule, "match for unknown rule, no actions planned");
            return Vec::new();
        };
        types
            .iter()
            .map(|t| Action {
                match_id,
                rule: m.rule.clone(),
                action_type: *t,
                payload: json!({
                    "rule": m.rule,
                    "entry_id": m.entry_id,
                    "title": m.entry_title,
                    "link": m.entry_link,
                    "source": m.source,
                    "confidence": m.confidence,
                    "keywords": m.matched_keywords,
                }),
                alert: Alert::from_match(*t, m),
                created_at: now,
            })
            .collect()
    }

    /// Plan and execute every action for one match. Notifiers are called
    /// here; rows are written later by [`persist_actions`].
    pub async fn dispatch(&self, m: &Match, now: DateTime<Utc>) -> (DispatchReport, Vec<Action>) {
        ensure_metrics_described();
        let mut actions = self.plan(None, m, now);
        let mut report = DispatchReport {
            planned: actions.len(),
            ..DispatchReport::default()
        };

        if self.dry_run {
            for action in &actions {
                tracing::info!(
                    rule = %action.rule,
                    action = %action.action_type,
                    title = %m.entry_title,
                    "dry-run: action not executed"
                );
            }
            return (report, actions);
        }

        for action in &mut actions {
            match self.execute(action, m).await {
                Executed::Logged => {}
                Executed::Alerted(table) => {
                    report.alerts += 1;
                    set_status(action, "recorded", Some(table));
                }
                Executed::Notified(channel) => {
                    report.notified += 1;
                    set_status(action, "sent", Some(channel));
                }
                Executed::Failed(err) => {
                    metrics::counter!("dispatch_failures_total").increment(1);
                    tracing::warn!(error = %err, "action failed");
                    set_status(action, "failed", None);
                    if let serde_json::Value::Object(map) = &mut action.payload {
                        map.insert("error".into(), json!(err.to_string()));
                    }
                    report.failures.push(err);
                }
            }
        }
        (report, actions)
    }

    async fn execute(&self, action: &Action, m: &Match) -> Executed {
        match action.action_type {
            ActionType::Log => {
                tracing::info!(
                    rule = %m.rule,
                    confidence = m.confidence,
                    source = %m.source,
                    link = %m.entry_link,
                    "trigger fired: {}",
                    m.entry_title
                );
                Executed::Logged
            }
            t if t.is_notify() => {
                let Some(notifier) = self.notifiers.get(t) else {
                    return Executed::Failed(DispatchError::NoNotifier(t));
                };
                let ev = NotificationEvent::from(m);
                match notifier.send(&ev).await {
                    Ok(()) => Executed::Notified(notifier.channel()),
                    Err(error) => Executed::Failed(DispatchError::Notify {
                        channel: notifier.channel(),
                        rule: m.rule.clone(),
                        error,
                    }),
                }
            }
            _ => match &action.alert {
                Some(alert) => Executed::Alerted(alert.table()),
                None => Executed::Logged,
            },
        }
    }
}

/// Write executed actions for a stored match, plus their alert rows.
/// Returns the number of action rows written.
pub fn persist_actions(
    w: &CycleWriter<'_>,
    match_id: i64,
    actions: &mut [Action],
) -> Result<usize, StorageError> {
    for action in actions.iter_mut() {
        action.match_id = Some(match_id);
        w.record_action(action)?;
        if let Some(alert) = &action.alert {
            w.record_alert(match_id, alert)?;
        }
    }
    Ok(actions.len())
}

enum Executed {
    Logged,
    Alerted(&'static str),
    Notified(&'static str),
    Failed(DispatchError),
}

fn set_status(action: &mut Action, status: &str, target: Option<&str>) {
    if let serde_json::Value::Object(map) = &mut action.payload {
        map.insert("status".into(), json!(status));
        if let Some(t) = target {
            map.insert("target".into(), json!(t));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_match(rule: &str) -> Match {
        Match {
            rule: rule.into(),
            entry_id: "e1".into(),
            entry_title: "Deal".into(),
            entry_link: "https://example.com/d".into(),
            source: "feed".into(),
            confidence: 0.9,
            matched_keywords: vec!["deal".into()],
            snippet: "deal".into(),
            matched_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn plan_follows_rule_action_order() {
        let rule = TriggerRule::new("deals", &["deal"]).with_actions(&[
            ActionType::Log,
            ActionType::Slack,
            ActionType::ArbitrageAlert,
        ]);
        let d = Dispatcher::new(&[rule], NotifierRegistry::new(), false);
        let m = sample_match("deals");
        let plan = d.plan(Some(7), &m, m.matched_at);
        let types: Vec<_> = plan.iter().map(|a| a.action_type).collect();
        assert_eq!(
            types,
            vec![ActionType::Log, ActionType::Slack, ActionType::ArbitrageAlert]
        );
        assert!(plan.iter().all(|a| a.match_id == Some(7)));
        assert_eq!(plan[0].payload["entry_id"], "e1");
        assert!(plan[0].alert.is_none());
        assert_eq!(plan[2].alert.as_ref().map(Alert::table), Some("arbitrage_alerts"));
    }

    #[test]
    fn unknown_rule_plans_nothing() {
        let d = Dispatcher::new(&[], NotifierRegistry::new(), false);
        let m = sample_match("ghost");
        assert!(d.plan(Some(1), &m, m.matched_at).is_empty());
    }

    #[test]
    fn action_type_display_matches_serde() {
        for t in [
            ActionType::Log,
            ActionType::CompetitiveIntel,
            ActionType::TrendAlert,
        ] {
            let s = serde_json::to_value(t).unwrap();
            assert_eq!(s, t.to_string());
        }
    }
}
