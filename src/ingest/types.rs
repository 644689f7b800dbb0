// src/ingest/types.rs
use chrono::{DateTime, Utc};

use crate::error::FetchError;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Entry {
    pub id: String,              // hash of the dedupe key
    pub title: String,           // normalized
    pub description: String,     // normalized
    pub link: String,            // as published (may be empty)
    pub published: DateTime<Utc>,
    pub source: String,          // feed name, e.g. "slickdeals"
    pub priority: i32,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Entry {
    /// Build an entry and derive its stable id from the dedupe key.
    pub fn new(
        source: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        link: impl Into<String>,
        published: DateTime<Utc>,
    ) -> Self {
        let mut e = Self {
            id: String::new(),
            title: title.into(),
            description: description.into(),
            link: link.into(),
            published,
            source: source.into(),
            priority: 0,
            tags: Vec::new(),
        };
        e.id = super::dedupe::entry_id(&e);
        e
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn dedupe_key(&self) -> String {
        super::dedupe::dedupe_key(&self.link, &self.title, &self.source)
    }
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<Entry>, FetchError>;
    fn name(&self) -> &str;
    /// Minimum spacing between two fetches of this source, in seconds.
    fn rate_limit_secs(&self) -> u64 {
        0
    }
}
