// src/ingest/providers/rss.rs
//! RSS 2.0 / Atom provider. Fetches over HTTP or parses an in-memory
//! fixture; both paths share the same parser, item filter and `max_items`
//! cap.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::clock::{Clock, SystemClock};
use crate::config::FeedConfig;
use crate::error::{ConfigError, FetchError};
use crate::ingest::filter::ItemFilter;
use crate::ingest::normalize_text;
use crate::ingest::types::{Entry, FeedSource};

const USER_AGENT: &str = concat!("feed-trigger/", env!("CARGO_PKG_VERSION"));
const TEXT_CAP: usize = 500;

/* ---- RSS 2.0 ---- */

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<TextNode>,
}

/* ---- Atom ---- */

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
    published: Option<String>,
    updated: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<AtomCategory>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href", default)]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomCategory {
    #[serde(rename = "@term", default)]
    term: String,
}

/// Element whose attributes we ignore and whose text we keep.
#[derive(Debug, Deserialize, Default)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if let Ok(dt) = OffsetDateTime::parse(ts, &Rfc2822) {
        let unix = dt.to_offset(UtcOffset::UTC).unix_timestamp();
        return Utc.timestamp_opt(unix, 0).single();
    }
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

pub struct RssSource {
    name: String,
    priority: i32,
    max_items: usize,
    rate_limit_secs: u64,
    filter: ItemFilter,
    clock: Arc<dyn Clock>,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        url: String,
        client: reqwest::Client,
    },
}

impl RssSource {
    /// HTTP-backed source for a configured feed.
    pub fn from_config(cfg: &FeedConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("feed {}: http client: {e}", cfg.name)))?;
        Self::build(
            cfg,
            Mode::Http {
                url: cfg.url.clone(),
                client,
            },
        )
    }

    /// Source that parses `xml` on every fetch instead of hitting the network.
    pub fn from_fixture(cfg: &FeedConfig, xml: &str) -> Result<Self, ConfigError> {
        Self::build(cfg, Mode::Fixture(xml.to_string()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn build(cfg: &FeedConfig, mode: Mode) -> Result<Self, ConfigError> {
        Ok(Self {
            name: cfg.name.clone(),
            priority: cfg.priority,
            max_items: cfg.max_items,
            rate_limit_secs: cfg.rate_limit_secs,
            filter: ItemFilter::from_config(&cfg.name, &cfg.filter)?,
            clock: Arc::new(SystemClock),
            mode,
        })
    }

    /// Parse a feed document (RSS or Atom), filter, cap to `max_items`.
    pub fn parse_feed(&self, xml: &str) -> Result<Vec<Entry>, FetchError> {
        let t0 = std::time::Instant::now();
        let now = self.clock.now();
        let xml_clean = scrub_html_entities_for_xml(xml);

        let raw = if looks_like_atom(&xml_clean) {
            self.parse_atom(&xml_clean, now)?
        } else {
            self.parse_rss(&xml_clean, now)?
        };

        let mut raw = raw;
        raw.truncate(self.max_items);

        let (kept, dropped) = self.filter.apply(raw, now);
        if dropped > 0 {
            tracing::debug!(source = %self.name, dropped, "item filter dropped entries");
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        counter!("ingest_entries_total").increment(kept.len() as u64);
        Ok(kept)
    }

    fn parse_rss(&self, xml: &str, now: DateTime<Utc>) -> Result<Vec<Entry>, FetchError> {
        let rss: Rss = from_str(xml).map_err(|e| self.parse_error(e))?;
        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = normalize_text(it.title.as_deref().unwrap_or_default(), TEXT_CAP);
            let description =
                normalize_text(it.description.as_deref().unwrap_or_default(), TEXT_CAP);
            if title.is_empty() && description.is_empty() {
                continue;
            }
            let published = it
                .pub_date
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(now);
            let tags = it
                .categories
                .into_iter()
                .map(|c| c.value.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            out.push(
                Entry::new(
                    self.name.clone(),
                    title,
                    description,
                    it.link.unwrap_or_default().trim(),
                    published,
                )
                .with_priority(self.priority)
                .with_tags(tags),
            );
        }
        Ok(out)
    }

    fn parse_atom(&self, xml: &str, now: DateTime<Utc>) -> Result<Vec<Entry>, FetchError> {
        let feed: AtomFeed = from_str(xml).map_err(|e| self.parse_error(e))?;
        let mut out = Vec::with_capacity(feed.entry.len());
        for it in feed.entry {
            let title = normalize_text(
                it.title.as_ref().map(|t| t.value.as_str()).unwrap_or_default(),
                TEXT_CAP,
            );
            let body = it
                .summary
                .as_ref()
                .or(it.content.as_ref())
                .map(|t| t.value.as_str())
                .unwrap_or_default();
            let description = normalize_text(body, TEXT_CAP);
            if title.is_empty() && description.is_empty() {
                continue;
            }
            // Prefer rel="alternate" (or no rel), else the first link.
            let link = it
                .links
                .iter()
                .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                .or_else(|| it.links.first())
                .map(|l| l.href.trim().to_string())
                .unwrap_or_default();
            let published = it
                .published
                .as_deref()
                .or(it.updated.as_deref())
                .and_then(parse_timestamp)
                .unwrap_or(now);
            let tags = it
                .categories
                .into_iter()
                .map(|c| c.term.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            out.push(
                Entry::new(self.name.clone(), title, description, link, published)
                    .with_priority(self.priority)
                    .with_tags(tags),
            );
        }
        Ok(out)
    }

    fn parse_error(&self, e: impl std::fmt::Display) -> FetchError {
        FetchError::Parse {
            source_name: self.name.clone(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl FeedSource for RssSource {
    async fn fetch_latest(&self) -> Result<Vec<Entry>, FetchError> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_feed(s),
            Mode::Http { url, client } => {
                let resp = client.get(url).send().await.map_err(|e| FetchError::Http {
                    source_name: self.name.clone(),
                    error: e,
                })?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        source_name: self.name.clone(),
                        status: status.as_u16(),
                    });
                }
                let body = resp.text().await.map_err(|e| FetchError::Http {
                    source_name: self.name.clone(),
                    error: e,
                })?;
                self.parse_feed(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn rate_limit_secs(&self) -> u64 {
        self.rate_limit_secs
    }
}

fn looks_like_atom(xml: &str) -> bool {
    // Skip the prolog and comments; decide on the first element name.
    let mut rest = xml.trim_start();
    loop {
        if rest.starts_with("<?") {
            match rest.find("?>") {
                Some(i) => rest = rest[i + 2..].trim_start(),
                None => return false,
            }
        } else if rest.starts_with("<!") {
            match rest.find('>') {
                Some(i) => rest = rest[i + 1..].trim_start(),
                None => return false,
            }
        } else {
            return rest.starts_with("<feed");
        }
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_cfg(max_items: usize) -> FeedConfig {
        FeedConfig {
            name: "unit".into(),
            url: "https://example.com/rss".into(),
            max_items,
            ..Default::default()
        }
    }

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title>
<item><title>First &amp; best deal</title><link>https://example.com/a</link>
<pubDate>Mon, 16 Feb 2026 12:00:00 +0000</pubDate>
<description>&lt;p&gt;Cheap&nbsp;stuff&lt;/p&gt;</description>
<category>deals</category><category>hardware</category></item>
<item><title>Second</title><link>https://example.com/b</link></item>
<item><title></title><description></description></item>
</channel></rss>"#;

    #[test]
    fn parses_rss_items_with_tags_and_dates() {
        let src = RssSource::from_fixture(&feed_cfg(50), RSS).unwrap();
        let items = src.parse_feed(RSS).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "First & best deal");
        assert_eq!(items[0].description, "Cheap stuff");
        assert_eq!(items[0].tags, vec!["deals", "hardware"]);
        assert_eq!(
            items[0].published,
            Utc.with_ymd_and_hms(2026, 2, 16, 12, 0, 0).unwrap()
        );
        assert_eq!(items[0].source, "unit");
    }

    #[test]
    fn max_items_caps_output() {
        let src = RssSource::from_fixture(&feed_cfg(1), RSS).unwrap();
        assert_eq!(src.parse_feed(RSS).unwrap().len(), 1);
    }

    #[test]
    fn detects_atom_after_prolog() {
        assert!(looks_like_atom(
            "<?xml version=\"1.0\"?>\n<!-- c -->\n<feed xmlns=\"http://www.w3.org/2005/Atom\">"
        ));
        assert!(!looks_like_atom("<?xml version=\"1.0\"?><rss>"));
    }

    #[test]
    fn garbage_is_parse_error() {
        let src = RssSource::from_fixture(&feed_cfg(5), "nope").unwrap();
        assert!(matches!(
            src.parse_feed("<rss><channel><item>"),
            Err(FetchError::Parse { .. })
        ));
    }
}
