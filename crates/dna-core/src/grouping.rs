//! Grouping key resolution
//!
//! Maps a destination hostname to the logical cluster it belongs to. Explicit
//! rules are evaluated in configured order and the first match wins; when no
//! rule matches the key is the hostname's first label.
//!
//! ## Rule syntax
//!
//! ```text
//! <matcher>:<pattern>=<key>
//!
//! matcher  contains | prefix | label | first-label
//! key      a literal key, or @next for "matched label + following label"
//! ```
//!
//! `label:kafka=@next` maps `kfkdev-1-fed.fed.kafka.dev.euw.example.com` to
//! `kafka.dev`; `contains:sgmonitoring=monitoring` maps any hostname
//! containing `sgmonitoring` to `monitoring`.

use crate::config::NamingConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The logical cluster a hostname belongs to
pub type GroupingKey = String;

/// Key marker for [`KeySpec::LabelAndNext`] in the textual rule form
const NEXT_LABEL_MARKER: &str = "@next";

/// A test applied to a lower-cased hostname
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "pattern", rename_all = "kebab-case")]
pub enum Matcher {
    /// Hostname contains the pattern
    Contains(String),
    /// Hostname starts with the pattern
    Prefix(String),
    /// Some dot-separated label equals the pattern
    Label(String),
    /// The first label equals the pattern
    FirstLabel(String),
}

impl Matcher {
    fn pattern(&self) -> &str {
        match self {
            Matcher::Contains(p) | Matcher::Prefix(p) | Matcher::Label(p) | Matcher::FirstLabel(p) => {
                p.as_str()
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Matcher::Contains(_) => "contains",
            Matcher::Prefix(_) => "prefix",
            Matcher::Label(_) => "label",
            Matcher::FirstLabel(_) => "first-label",
        }
    }

    /// Index of the matched label, or `usize::MAX` for whole-hostname matchers
    fn find(&self, hostname: &str, labels: &[&str]) -> Option<usize> {
        let pattern = self.pattern().to_lowercase();
        match self {
            Matcher::Contains(_) => hostname.contains(&pattern).then_some(usize::MAX),
            Matcher::Prefix(_) => hostname.starts_with(&pattern).then_some(usize::MAX),
            Matcher::Label(_) => labels.iter().position(|label| *label == pattern),
            Matcher::FirstLabel(_) => (labels.first() == Some(&pattern.as_str())).then_some(0),
        }
    }
}

/// How a matching rule produces its key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeySpec {
    /// A fixed key
    Literal(String),
    /// The matched label joined with the label after it
    LabelAndNext,
}

/// One `(matcher, key)` pair of the grouping table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingRule {
    /// What the hostname must satisfy
    pub matcher: Matcher,
    /// The key produced on match
    pub key: KeySpec,
}

impl GroupingRule {
    /// Create a new rule
    pub fn new(matcher: Matcher, key: KeySpec) -> Self {
        Self { matcher, key }
    }

    /// Validate the rule
    pub fn validate(&self) -> Result<()> {
        if self.matcher.pattern().trim().is_empty() {
            return Err(Error::config(format!("Grouping rule '{}' has an empty pattern", self)));
        }
        match (&self.matcher, &self.key) {
            (Matcher::Contains(_) | Matcher::Prefix(_), KeySpec::LabelAndNext) => Err(Error::config(
                format!("Grouping rule '{}': {} only applies to label matchers", self, NEXT_LABEL_MARKER),
            )),
            (_, KeySpec::Literal(key)) if key.trim().is_empty() => {
                Err(Error::config(format!("Grouping rule '{}' has an empty key", self)))
            }
            _ => Ok(()),
        }
    }

    /// The key this rule yields for a hostname, if it matches
    fn key_for(&self, hostname: &str, labels: &[&str]) -> Option<GroupingKey> {
        let position = self.matcher.find(hostname, labels)?;
        match &self.key {
            KeySpec::Literal(key) => Some(key.to_lowercase()),
            KeySpec::LabelAndNext => {
                let label = labels.get(position)?;
                Some(match labels.get(position + 1) {
                    Some(next) => format!("{}.{}", label, next),
                    None => label.to_string(),
                })
            }
        }
    }
}

impl fmt::Display for GroupingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match &self.key {
            KeySpec::Literal(key) => key.as_str(),
            KeySpec::LabelAndNext => NEXT_LABEL_MARKER,
        };
        write!(f, "{}:{}={}", self.matcher.kind(), self.matcher.pattern(), key)
    }
}

impl FromStr for GroupingRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, rest) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| Error::config(format!("Grouping rule '{}' is missing ':'", s)))?;
        let (pattern, key) = rest
            .split_once('=')
            .ok_or_else(|| Error::config(format!("Grouping rule '{}' is missing '='", s)))?;

        let pattern = pattern.trim().to_string();
        let matcher = match kind.trim().to_lowercase().as_str() {
            "contains" => Matcher::Contains(pattern),
            "prefix" => Matcher::Prefix(pattern),
            "label" => Matcher::Label(pattern),
            "first-label" => Matcher::FirstLabel(pattern),
            other => {
                return Err(Error::config(format!(
                    "Unknown grouping matcher '{}'. Valid: contains, prefix, label, first-label",
                    other
                )));
            }
        };

        let key = match key.trim() {
            NEXT_LABEL_MARKER => KeySpec::LabelAndNext,
            literal => KeySpec::Literal(literal.to_string()),
        };

        let rule = Self::new(matcher, key);
        rule.validate()?;
        Ok(rule)
    }
}

/// Parse a `;`-separated rule list
pub fn parse_rules(raw: &str) -> Result<Vec<GroupingRule>> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Maps hostnames to grouping keys and keys to address list names
#[derive(Debug, Clone)]
pub struct GroupingKeyResolver {
    rules: Vec<GroupingRule>,
    naming: NamingConfig,
}

impl GroupingKeyResolver {
    /// Create a resolver from an ordered rule table
    pub fn new(rules: Vec<GroupingRule>, naming: NamingConfig) -> Self {
        Self { rules, naming }
    }

    /// The grouping key of a hostname
    ///
    /// Pure: the same hostname always yields the same key for a fixed
    /// rule table.
    pub fn key_for(&self, hostname: &str) -> GroupingKey {
        let hostname = hostname.trim().to_lowercase();
        let labels: Vec<&str> = hostname.split('.').collect();

        self.rules
            .iter()
            .find_map(|rule| rule.key_for(&hostname, &labels))
            .unwrap_or_else(|| short_form(&hostname))
    }

    /// The canonical address list name for a key (`DNA_<key>-IPL`)
    pub fn list_name(&self, key: &str) -> String {
        let safe: String = key
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '.' })
            .collect();
        format!("{}{}{}", self.naming.prefix, safe, self.naming.suffix)
    }

    /// Whether a list name carries the managed prefix
    pub fn is_managed(&self, list_name: &str) -> bool {
        list_name.starts_with(&self.naming.prefix)
    }
}

/// First label of a hostname; the whole hostname when the first label is empty
pub fn short_form(hostname: &str) -> GroupingKey {
    let hostname = hostname.trim().to_lowercase();
    match hostname.split('.').next() {
        Some(label) if !label.is_empty() => label.to_string(),
        _ => hostname,
    }
}
