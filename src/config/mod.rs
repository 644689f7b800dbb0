// src/config/mod.rs
//! Application configuration: feeds, trigger rules, scheduler window and
//! storage. Parsed from TOML, YAML or JSON (by extension) and validated
//! before anything runs.

pub mod rules;

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
pub use rules::{Field, TriggerRule};

pub const ENV_CONFIG_PATH: &str = "FEED_TRIGGER_CONFIG";
const DEFAULT_CANDIDATES: [&str; 4] = [
    "config/config.toml",
    "config/config.yaml",
    "config/config.yml",
    "config/config.json",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    #[serde(default)]
    pub triggers: Vec<TriggerRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u32,
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default)]
    pub dry_run: bool,
    /// Offset of the hour window from UTC, in minutes (e.g. 60 for CET).
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

fn default_interval_hours() -> u32 {
    4
}
fn default_start_hour() -> u32 {
    9
}
fn default_end_hour() -> u32 {
    23
}
fn default_max_concurrent_fetches() -> usize {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            dry_run: false,
            utc_offset_minutes: 0,
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_dedup_window_hours")]
    pub dedup_window_hours: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/feed_trigger.db")
}
fn default_dedup_window_hours() -> u32 {
    24
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            dedup_window_hours: default_dedup_window_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Minimum seconds between two fetches of this feed.
    #[serde(default = "default_rate_limit_secs", alias = "rate_limit")]
    pub rate_limit_secs: u64,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, alias = "filter_rules")]
    pub filter: FilterConfig,
}

fn default_priority() -> i32 {
    1
}
fn default_rate_limit_secs() -> u64 {
    30
}
fn default_max_items() -> usize {
    50
}
fn default_enabled() -> bool {
    true
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            priority: default_priority(),
            rate_limit_secs: default_rate_limit_secs(),
            max_items: default_max_items(),
            enabled: default_enabled(),
            filter: FilterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub required_tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => ConfigFormat::Yaml,
            "json" => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

impl AppConfig {
    /// Parse and validate a config document.
    pub fn parse(content: &str, format: ConfigFormat, origin: &Path) -> Result<Self, ConfigError> {
        let parse_err = |message: String| ConfigError::Parse {
            path: origin.to_path_buf(),
            message,
        };
        let cfg: AppConfig = match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| parse_err(e.to_string()))?,
            ConfigFormat::Yaml => {
                serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string()))?
            }
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?
            }
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate the config at `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content, ConfigFormat::from_path(path), path)
    }

    /// Resolve the config path and load it:
    /// 1) `explicit` (e.g. `--config`), which must exist
    /// 2) $FEED_TRIGGER_CONFIG, which must exist
    /// 3) config/config.{toml,yaml,yml,json}
    /// 4) built-in defaults (no feeds, no triggers)
    ///
    /// Returns the path actually used, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(p) = explicit {
            return Ok((Self::load_from(p)?, Some(p.to_path_buf())));
        }
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            return Ok((Self::load_from(&pb)?, Some(pb)));
        }
        for candidate in DEFAULT_CANDIDATES {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Ok((Self::load_from(&pb)?, Some(pb)));
            }
        }
        tracing::warn!("no config file found, using built-in defaults");
        Ok((Self::default(), None))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        if s.interval_hours == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.interval_hours must be >= 1".into(),
            ));
        }
        if s.start_hour > 23 || s.end_hour > 23 {
            return Err(ConfigError::Invalid(format!(
                "scheduler hours must be within 0..=23 (got {}..{})",
                s.start_hour, s.end_hour
            )));
        }
        if s.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::Invalid(
                "scheduler.utc_offset_minutes must be within one day".into(),
            ));
        }
        if self.storage.dedup_window_hours == 0 {
            return Err(ConfigError::Invalid(
                "storage.dedup_window_hours must be >= 1".into(),
            ));
        }

        let mut seen = std::collections::BTreeSet::new();
        for f in &self.feeds {
            if f.name.trim().is_empty() {
                return Err(ConfigError::Invalid("feed with empty name".into()));
            }
            if f.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("feed {}: empty url", f.name)));
            }
            if !seen.insert(f.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate feed name {}", f.name)));
            }
        }

        rules::validate_rules(&self.triggers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::parse("", ConfigFormat::Toml, Path::new("inline.toml")).unwrap();
        assert_eq!(cfg.scheduler.interval_hours, 4);
        assert_eq!((cfg.scheduler.start_hour, cfg.scheduler.end_hour), (9, 23));
        assert_eq!(cfg.storage.dedup_window_hours, 24);
        assert!(cfg.feeds.is_empty());
    }

    #[test]
    fn feed_defaults_and_aliases() {
        let yaml = r#"
feeds:
  - name: deals
    url: https://example.com/rss
    rate_limit: 10
    filter_rules:
      max_age_days: 7
"#;
        let cfg = AppConfig::parse(yaml, ConfigFormat::Yaml, Path::new("x.yaml")).unwrap();
        let f = &cfg.feeds[0];
        assert_eq!(f.rate_limit_secs, 10);
        assert_eq!(f.max_items, 50);
        assert!(f.enabled);
        assert_eq!(f.filter.max_age_days, Some(7));
    }

    #[test]
    fn bad_hours_rejected() {
        let toml = "[scheduler]\nstart_hour = 25\n";
        assert!(matches!(
            AppConfig::parse(toml, ConfigFormat::Toml, Path::new("x.toml")),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.YML")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a")), ConfigFormat::Toml);
    }
}
