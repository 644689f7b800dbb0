// src/config/rules.rs
//! Trigger rule schema. Rules are parsed into typed structs at load time;
//! unknown keys, unknown fields or action types, empty keyword lists and
//! out-of-range thresholds are rejected before the scheduler starts.

use serde::Deserialize;
use std::collections::BTreeSet;

use crate::dispatch::ActionType;
use crate::error::ConfigError;

/// Entry field a rule can search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    Description,
    Tags,
    Link,
}

impl Field {
    /// Importance weight used by confidence scoring.
    pub fn weight(self) -> f32 {
        match self {
            Field::Title => 1.0,
            Field::Description => 0.7,
            Field::Tags => 0.5,
            Field::Link => 0.3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Description => "description",
            Field::Tags => "tags",
            Field::Link => "link",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerRule {
    pub name: String,
    /// All must be present (AND).
    pub keywords: Vec<String>,
    #[serde(default = "default_fields", alias = "match_on")]
    pub fields: Vec<Field>,
    /// Any present rejects the entry.
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default = "default_threshold", alias = "min_confidence")]
    pub confidence_threshold: f32,
    #[serde(default = "default_actions")]
    pub actions: Vec<ActionType>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_fields() -> Vec<Field> {
    vec![Field::Title, Field::Description]
}
fn default_threshold() -> f32 {
    0.7
}
fn default_actions() -> Vec<ActionType> {
    vec![ActionType::Log]
}
fn default_enabled() -> bool {
    true
}

impl TriggerRule {
    /// Rule with default fields, threshold and actions.
    pub fn new(name: impl Into<String>, keywords: &[&str]) -> Self {
        Self {
            name: name.into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            fields: default_fields(),
            exclude_keywords: Vec::new(),
            confidence_threshold: default_threshold(),
            actions: default_actions(),
            enabled: true,
        }
    }

    pub fn with_fields(mut self, fields: &[Field]) -> Self {
        self.fields = fields.to_vec();
        self
    }

    pub fn with_excludes(mut self, excludes: &[&str]) -> Self {
        self.exclude_keywords = excludes.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_threshold(mut self, t: f32) -> Self {
        self.confidence_threshold = t;
        self
    }

    pub fn with_actions(mut self, actions: &[ActionType]) -> Self {
        self.actions = actions.to_vec();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bad = |msg: &str| Err(ConfigError::Invalid(format!("trigger {}: {msg}", self.name)));

        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("trigger with empty name".into()));
        }
        if self.keywords.is_empty() || self.keywords.iter().any(|k| k.trim().is_empty()) {
            return bad("keywords must be a non-empty list of non-empty strings");
        }
        if self.exclude_keywords.iter().any(|k| k.trim().is_empty()) {
            return bad("exclude_keywords must not contain empty strings");
        }
        if self.fields.is_empty() {
            return bad("fields must not be empty");
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return bad("confidence_threshold must be within 0.0..=1.0");
        }
        Ok(())
    }
}

pub fn validate_rules(rules: &[TriggerRule]) -> Result<(), ConfigError> {
    let mut names = BTreeSet::new();
    for r in rules {
        r.validate()?;
        if !names.insert(r.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate trigger name {}",
                r.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Doc {
        triggers: Vec<TriggerRule>,
    }

    #[test]
    fn parses_full_rule_from_yaml() {
        let yaml = r#"
triggers:
  - name: arbitrage
    keywords: [deal, cheap]
    fields: [title, tags]
    exclude_keywords: [scam]
    confidence_threshold: 0.6
    actions: [log, discord, arbitrage_alert]
"#;
        let doc: Doc = serde_yaml::from_str(yaml).unwrap();
        let r = &doc.triggers[0];
        assert_eq!(r.fields, vec![Field::Title, Field::Tags]);
        assert_eq!(
            r.actions,
            vec![ActionType::Log, ActionType::Discord, ActionType::ArbitrageAlert]
        );
        assert!(validate_rules(&doc.triggers).is_ok());
    }

    #[test]
    fn unknown_field_fails_at_parse_time() {
        let yaml = "triggers:\n  - name: x\n    keywords: [a]\n    fields: [body]\n";
        assert!(serde_yaml::from_str::<Doc>(yaml).is_err());
    }

    #[test]
    fn misspelled_key_fails_at_parse_time() {
        let yaml = "triggers:\n  - name: x\n    keyword: [a]\n";
        assert!(serde_yaml::from_str::<Doc>(yaml).is_err());
    }

    #[test]
    fn empty_keywords_and_bad_threshold_rejected() {
        let empty = TriggerRule::new("e", &[]);
        assert!(empty.validate().is_err());
        let hi = TriggerRule::new("h", &["a"]).with_threshold(1.5);
        assert!(hi.validate().is_err());
    }

    #[test]
    fn duplicate_names_rejected() {
        let rules = vec![TriggerRule::new("a", &["x"]), TriggerRule::new("a", &["y"])];
        assert!(validate_rules(&rules).is_err());
    }
}
