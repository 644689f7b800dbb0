//! Sends one sample match through every notifier configured in the
//! environment (DISCORD_WEBHOOK_URL, SLACK_WEBHOOK_URL, SMTP_*).

use chrono::Utc;
use feed_trigger::{ActionType, NotificationEvent, NotifierRegistry};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();
    let registry = NotifierRegistry::from_env();

    let ev = NotificationEvent {
        rule: "demo".into(),
        title: "Flash sale: 40% off mechanical keyboards".into(),
        link: "https://example.com/deals/keyboards".into(),
        source: "notify-demo".into(),
        confidence: 0.82,
        keywords: vec!["sale".into(), "keyboard".into()],
        snippet: "Flash sale on mechanical keyboards, today only.".into(),
        ts: Utc::now(),
    };

    let channels = [ActionType::Discord, ActionType::Slack, ActionType::Email];
    let mut sent = 0;
    for action in channels {
        let Some(notifier) = registry.get(action) else {
            tracing::info!(channel = %action, "not configured, skipping");
            continue;
        };
        match notifier.send(&ev).await {
            Ok(()) => {
                sent += 1;
                tracing::info!(channel = notifier.channel(), "sent");
            }
            Err(e) => tracing::warn!(channel = notifier.channel(), error = %e, "send failed"),
        }
    }

    println!("notify-demo done ({sent} sent)");
}
