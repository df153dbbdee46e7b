//! Configuration types for the DNA reconciler
//!
//! This module defines all configuration structures used throughout the crate.
//! A [`ReconcileConfig`] is built once per run and handed to each stage's
//! constructor; no stage reads process-wide state.

use crate::grouping::GroupingRule;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Address list naming
    #[serde(default)]
    pub naming: NamingConfig,

    /// Flow filtering
    #[serde(default)]
    pub filter: FilterConfig,

    /// Explicit grouping rules, evaluated in order
    #[serde(default)]
    pub grouping_rules: Vec<GroupingRule>,

    /// Zone expansion and name resolution
    #[serde(default)]
    pub zones: ZoneConfig,

    /// Environment classes, highest priority first
    #[serde(default = "default_environments")]
    pub environments: Vec<EnvironmentClass>,

    /// Traffic windows and staleness
    #[serde(default)]
    pub windows: WindowConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl ReconcileConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            naming: NamingConfig::default(),
            filter: FilterConfig::default(),
            grouping_rules: Vec::new(),
            zones: ZoneConfig::default(),
            environments: default_environments(),
            windows: WindowConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.naming.validate()?;
        self.zones.validate()?;
        self.windows.validate()?;

        for rule in &self.grouping_rules {
            rule.validate()?;
        }

        for class in &self.environments {
            if class.name.trim().is_empty() {
                return Err(crate::Error::config("Environment class name cannot be empty"));
            }
            if class.tokens.iter().any(|t| t.trim().is_empty()) {
                return Err(crate::Error::config(format!(
                    "Environment class {} has an empty token",
                    class.name
                )));
            }
        }

        if self.engine.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }

        Ok(())
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Address list naming: `<prefix><key><suffix>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Reserved prefix; only lists carrying it are managed
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Suffix appended to every generated name
    #[serde(default = "default_suffix")]
    pub suffix: String,
}

impl NamingConfig {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.prefix.is_empty() {
            return Err(crate::Error::config("Address list prefix cannot be empty"));
        }
        Ok(())
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            suffix: default_suffix(),
        }
    }
}

/// Flow filtering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Substring identifying cloud-assigned ephemeral compute names
    #[serde(default = "default_cloud_marker")]
    pub cloud_marker: String,

    /// Also reject dash-encoded IPv4 hostnames (`ip-10-1-2-3.internal`)
    #[serde(default)]
    pub reject_ip_style_hostnames: bool,

    /// Drop repeated (hostname, address) pairs
    #[serde(default = "default_true")]
    pub deduplicate: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            cloud_marker: default_cloud_marker(),
            reject_ip_style_hostnames: false,
            deduplicate: true,
        }
    }
}

/// Zone expansion and resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Region markers, in configured order
    #[serde(default = "default_zone_tokens")]
    pub tokens: Vec<String>,

    /// Per-hostname resolution timeout (in milliseconds)
    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,

    /// Maximum number of concurrent resolutions
    #[serde(default = "default_resolver_concurrency")]
    pub resolver_concurrency: usize,
}

impl ZoneConfig {
    /// Per-hostname resolution timeout
    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.tokens.iter().any(|t| t.trim().is_empty()) {
            return Err(crate::Error::config("Zone tokens cannot be empty"));
        }

        let mut seen = std::collections::HashSet::new();
        for token in &self.tokens {
            if !seen.insert(token.to_lowercase()) {
                return Err(crate::Error::config(format!("Duplicate zone token: {}", token)));
            }
        }

        if self.dns_timeout_ms == 0 {
            return Err(crate::Error::config("DNS timeout must be > 0"));
        }
        if self.resolver_concurrency == 0 {
            return Err(crate::Error::config("Resolver concurrency must be > 0"));
        }
        Ok(())
    }
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            tokens: default_zone_tokens(),
            dns_timeout_ms: default_dns_timeout_ms(),
            resolver_concurrency: default_resolver_concurrency(),
        }
    }
}

/// A named environment and the name tokens that identify it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentClass {
    /// Class name (e.g. "production")
    pub name: String,
    /// Tokens matched against dot/dash separated name components
    pub tokens: Vec<String>,
}

impl EnvironmentClass {
    /// Create a new environment class
    pub fn new<S: Into<String>>(name: impl Into<String>, tokens: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

/// Traffic windows (all in days)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Primary outbound traffic window
    #[serde(default = "default_traffic_window_days")]
    pub traffic_window_days: u32,

    /// Secondary lookback window used before removing an address
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Age after which a removal candidate or list is reported as stale
    #[serde(default = "default_stale_days")]
    pub stale_days: u32,
}

impl WindowConfig {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.traffic_window_days == 0 {
            return Err(crate::Error::config("Traffic window must be > 0 days"));
        }
        if self.lookback_days == 0 {
            return Err(crate::Error::config("Lookback window must be > 0 days"));
        }
        if self.stale_days == 0 {
            return Err(crate::Error::config("Staleness threshold must be > 0 days"));
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            traffic_window_days: default_traffic_window_days(),
            lookback_days: default_lookback_days(),
            stale_days: default_stale_days(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Compute and report the delta without writing to the store
    #[serde(default)]
    pub dry_run: bool,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Additional metadata copied into the run report
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            event_channel_capacity: default_event_channel_capacity(),
            metadata: HashMap::new(),
        }
    }
}

fn default_prefix() -> String {
    "DNA_".to_string()
}

fn default_suffix() -> String {
    "-IPL".to_string()
}

fn default_cloud_marker() -> String {
    ".compute.".to_string()
}

fn default_true() -> bool {
    true
}

fn default_zone_tokens() -> Vec<String> {
    ["eu-fr-paris", "eu-fr-north", "hk-hongkong", "sg-singapore"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_dns_timeout_ms() -> u64 {
    2000
}

fn default_resolver_concurrency() -> usize {
    16
}

/// Default environment priority: production > pre-production > UAT > development
pub fn default_environments() -> Vec<EnvironmentClass> {
    vec![
        EnvironmentClass::new("production", ["prd", "prod", "production"]),
        EnvironmentClass::new(
            "preproduction",
            ["ppr", "pprd", "preprod", "preprd", "stg", "staging"],
        ),
        EnvironmentClass::new("uat", ["uat", "hml", "homol", "recette"]),
        EnvironmentClass::new("development", ["dev", "develop", "development", "test", "tst"]),
    ]
}

fn default_traffic_window_days() -> u32 {
    7
}

fn default_lookback_days() -> u32 {
    60
}

fn default_stale_days() -> u32 {
    21
}

fn default_event_channel_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReconcileConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.zones.tokens.len(), 4);
        assert_eq!(config.zones.dns_timeout(), Duration::from_secs(2));
        assert_eq!(config.windows.lookback_days, 60);
        assert_eq!(config.windows.stale_days, 21);
    }

    #[test]
    fn test_duplicate_zone_tokens_rejected() {
        let mut config = ReconcileConfig::default();
        config.zones.tokens = vec!["zoneA".to_string(), "ZONEA".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_windows_rejected() {
        let mut config = ReconcileConfig::default();
        config.windows.lookback_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: ReconcileConfig =
            serde_json::from_str(r#"{"zones": {"tokens": ["zonea", "zoneb"]}}"#).unwrap();

        assert_eq!(config.zones.tokens, vec!["zonea", "zoneb"]);
        assert_eq!(config.zones.resolver_concurrency, 16);
        assert_eq!(config.naming.prefix, "DNA_");
        assert_eq!(config.environments.len(), 4);
        assert!(config.filter.deduplicate);
    }
}
