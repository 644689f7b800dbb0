// src/notify/mod.rs
//! Outbound notification channels (Discord, Slack, email).
//!
//! Each channel implements [`Notifier`]. The [`NotifierRegistry`] maps the
//! notify-type [`ActionType`]s onto configured channels; a channel whose
//! credentials are absent from the environment is simply not registered.

pub mod discord;
pub mod email;
pub mod slack;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::dispatch::ActionType;
use crate::matcher::Match;

pub use discord::DiscordNotifier;
pub use email::EmailSender;
pub use slack::SlackNotifier;

/// What a channel renders for one matched entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub rule: String,
    pub title: String,
    pub link: String,
    pub source: String,
    pub confidence: f32,
    pub keywords: Vec<String>,
    pub snippet: String,
    pub ts: DateTime<Utc>,
}

impl From<&Match> for NotificationEvent {
    fn from(m: &Match) -> Self {
        Self {
            rule: m.rule.clone(),
            title: m.entry_title.clone(),
            link: m.entry_link.clone(),
            source: m.source.clone(),
            confidence: m.confidence,
            keywords: m.matched_keywords.clone(),
            snippet: m.snippet.clone(),
            ts: m.matched_at,
        }
    }
}

impl NotificationEvent {
    /// One-line summary shared by the plain-text channels.
    pub fn headline(&self) -> String {
        format!(
            "[{}] {} ({:.0}% via {})",
            self.rule,
            self.title,
            self.confidence * 100.0,
            self.source
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short channel name used in logs and errors.
    fn channel(&self) -> &'static str;
    async fn send(&self, ev: &NotificationEvent) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct NotifierRegistry {
    by_action: HashMap<ActionType, Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from DISCORD_WEBHOOK_URL, SLACK_WEBHOOK_URL and the SMTP_* /
    /// NOTIFY_EMAIL_* variables. Missing or invalid settings leave that
    /// channel unregistered.
    pub fn from_env() -> Self {
        let mut reg = Self::new();
        if let Ok(url) = std::env::var("DISCORD_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                reg.register(ActionType::Discord, Arc::new(DiscordNotifier::new(url)));
            }
        }
        if let Some(slack) = SlackNotifier::from_env() {
            reg.register(ActionType::Slack, Arc::new(slack));
        }
        match EmailSender::from_env() {
            Ok(Some(email)) => reg.register(ActionType::Email, Arc::new(email)),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "email notifier disabled"),
        }
        tracing::debug!(channels = ?reg.registered(), "notifiers configured");
        reg
    }

    pub fn register(&mut self, action: ActionType, notifier: Arc<dyn Notifier>) {
        self.by_action.insert(action, notifier);
    }

    pub fn get(&self, action: ActionType) -> Option<&Arc<dyn Notifier>> {
        self.by_action.get(&action)
    }

    pub fn registered(&self) -> Vec<ActionType> {
        let mut v: Vec<_> = self.by_action.keys().copied().collect();
        v.sort_by_key(|a| a.as_str());
        v
    }
}
