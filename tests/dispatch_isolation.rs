// tests/dispatch_isolation.rs
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};

use feed_trigger::dispatch::{persist_actions, DispatchReport};
use feed_trigger::{
    ActionType, DispatchError, Dispatcher, ManualClock, Match, NotificationEvent, Notifier,
    NotifierRegistry, Store, TriggerRule,
};

/// Records every event; fails when `fail` is set.
struct Recorder {
    channel: &'static str,
    fail: bool,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Notifier for Recorder {
    fn channel(&self) -> &'static str {
        self.channel
    }

    async fn send(&self, ev: &NotificationEvent) -> anyhow::Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.channel, ev.title));
        if self.fail {
            anyhow::bail!("webhook returned 500");
        }
        Ok(())
    }
}

fn store() -> Store {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap(),
    ));
    Store::open_in_memory(clock, ChronoDuration::hours(24)).unwrap()
}

fn sample(rule: &str, title: &str) -> Match {
    Match {
        rule: rule.into(),
        entry_id: format!("id-{title}"),
        entry_title: title.into(),
        entry_link: "https://digest.example.com/items/1".into(),
        source: "digest".into(),
        confidence: 0.9,
        matched_keywords: vec!["deal".into()],
        snippet: "Huge deal".into(),
        matched_at: Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap(),
    }
}

/// Dispatch, then store the match and its actions the way a live cycle does.
async fn dispatch_and_store(d: &Dispatcher, store: &Store, m: &Match) -> (DispatchReport, usize) {
    let (report, mut actions) = d.dispatch(m, m.matched_at).await;
    let persisted = store
        .transaction(|w| {
            let id = w.record_match(m)?;
            persist_actions(w, id, &mut actions)
        })
        .unwrap();
    (report, persisted)
}

fn registry(seen: &Arc<Mutex<Vec<String>>>) -> NotifierRegistry {
    let mut reg = NotifierRegistry::new();
    reg.register(
        ActionType::Discord,
        Arc::new(Recorder {
            channel: "discord",
            fail: true,
            seen: seen.clone(),
        }),
    );
    reg.register(
        ActionType::Slack,
        Arc::new(Recorder {
            channel: "slack",
            fail: false,
            seen: seen.clone(),
        }),
    );
    reg
}

#[tokio::test]
async fn failing_notifier_does_not_block_other_actions() {
    let store = store();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let rule = TriggerRule::new("deals", &["deal"]).with_actions(&[
        ActionType::Discord,
        ActionType::Slack,
        ActionType::Log,
    ]);
    let d = Dispatcher::new(&[rule], registry(&seen), false);

    let m = sample("deals", "first");
    let (report, persisted) = dispatch_and_store(&d, &store, &m).await;

    assert_eq!(report.planned, 3);
    assert_eq!(persisted, 3);
    assert_eq!(report.notified, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        &report.failures[0],
        DispatchError::Notify { channel: "discord", .. }
    ));
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["discord:first".to_string(), "slack:first".to_string()]
    );
    assert_eq!(store.action_count().unwrap(), 3);

    // The next match is still dispatched in full.
    let m2 = sample("deals", "second");
    let (report2, persisted2) = dispatch_and_store(&d, &store, &m2).await;
    assert_eq!(report2.planned, 3);
    assert_eq!(persisted2, 3);
    assert_eq!(seen.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn missing_notifier_is_reported_not_fatal() {
    let store = store();
    let rule = TriggerRule::new("deals", &["deal"])
        .with_actions(&[ActionType::Email, ActionType::TrendAlert]);
    let d = Dispatcher::new(&[rule], NotifierRegistry::new(), false);

    let m = sample("deals", "only");
    let (report, _) = dispatch_and_store(&d, &store, &m).await;

    assert!(matches!(
        report.failures.as_slice(),
        [DispatchError::NoNotifier(ActionType::Email)]
    ));
    assert_eq!(report.alerts, 1);
    let stats = store.stats().unwrap();
    assert_eq!(stats["trend_alerts"], 1);
    assert_eq!(stats["agent_actions"], 2);
}

#[tokio::test]
async fn dry_run_sends_and_stores_nothing() {
    let store = store();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let rule = TriggerRule::new("deals", &["deal"])
        .with_actions(&[ActionType::Slack, ActionType::ArbitrageAlert]);
    let d = Dispatcher::new(&[rule], registry(&seen), true);

    let m = sample("deals", "dry");
    let (report, actions) = d.dispatch(&m, m.matched_at).await;

    assert_eq!(report.planned, 2);
    assert_eq!(report.persisted, 0);
    assert_eq!(actions.len(), 2);
    assert!(actions.iter().all(|a| a.match_id.is_none()));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(store.action_count().unwrap(), 0);
    assert_eq!(store.stats().unwrap()["arbitrage_alerts"], 0);
}

#[tokio::test]
async fn failed_action_status_is_stored_with_the_row() {
    let store = store();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let rule = TriggerRule::new("deals", &["deal"]).with_actions(&[ActionType::Discord]);
    let d = Dispatcher::new(&[rule], registry(&seen), false);

    let m = sample("deals", "status");
    let (_, mut actions) = d.dispatch(&m, m.matched_at).await;
    assert_eq!(actions[0].payload["status"], "failed");
    assert!(actions[0].payload["error"]
        .as_str()
        .unwrap()
        .contains("webhook returned 500"));

    store
        .transaction(|w| {
            let id = w.record_match(&m)?;
            persist_actions(w, id, &mut actions)
        })
        .unwrap();
    assert_eq!(actions[0].match_id, Some(1));
    assert_eq!(store.action_count().unwrap(), 1);
}
