// src/ingest/providers/mod.rs
pub mod rss;

use std::sync::Arc;

use crate::config::FeedConfig;
use crate::error::ConfigError;
use crate::ingest::types::FeedSource;

/// Build HTTP sources for every enabled feed.
pub fn sources_from_config(feeds: &[FeedConfig]) -> Result<Vec<Arc<dyn FeedSource>>, ConfigError> {
    let mut out: Vec<Arc<dyn FeedSource>> = Vec::new();
    for f in feeds.iter().filter(|f| f.enabled) {
        out.push(Arc::new(rss::RssSource::from_config(f)?));
    }
    Ok(out)
}
