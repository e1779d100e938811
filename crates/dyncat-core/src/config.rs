//! Configuration types for the catalog controller
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Attribute name or tag key -> comma-separated allow-list of values
pub type Filters = HashMap<String, String>;

/// Main controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Catalog node owned by this controller
    pub node_name: String,

    /// Instance and tag filters
    #[serde(default)]
    pub filters: FilterConfig,

    /// Resource fetcher settings
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Catalog watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Reconciler settings
    #[serde(default)]
    pub writer: WriterConfig,
}

impl ControllerConfig {
    /// Create a configuration for a node with defaults everywhere else
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            filters: FilterConfig::default(),
            fetcher: FetcherConfig::default(),
            watcher: WatcherConfig::default(),
            writer: WriterConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.node_name.trim().is_empty() {
            return Err(crate::Error::config("Catalog node name cannot be empty"));
        }

        self.fetcher.validate()?;
        self.watcher.validate()?;
        self.writer.validate()?;

        Ok(())
    }
}

/// User-declared filters, fixed for the process lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Filters on named resource attributes
    #[serde(default)]
    pub instance: Filters,

    /// Filters on resource tags
    #[serde(default)]
    pub tags: Filters,
}

/// Resource fetcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Interval between scheduled fetches (in seconds)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Page size requested from the resource API
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Consecutive failures after which the fetcher gives up
    ///
    /// Giving up is fatal for the whole process.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: usize,

    /// Delay before retrying a failed page (in seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// How long looked-up tags stay valid (in seconds, 0 disables caching)
    #[serde(default = "default_tag_cache_secs")]
    pub tag_cache_secs: u64,
}

impl FetcherConfig {
    /// Interval between scheduled fetches
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Delay before retrying a failed page
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Tag cache time-to-live
    pub fn tag_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.tag_cache_secs)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.check_interval_secs == 0 {
            return Err(crate::Error::config("Check interval must be > 0"));
        }
        if self.page_size == 0 {
            return Err(crate::Error::config("Page size must be > 0"));
        }
        if self.max_consecutive_errors == 0 {
            return Err(crate::Error::config("Max consecutive errors must be > 0"));
        }
        Ok(())
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            page_size: default_page_size(),
            max_consecutive_errors: default_max_consecutive_errors(),
            retry_delay_secs: default_retry_delay_secs(),
            tag_cache_secs: default_tag_cache_secs(),
        }
    }
}

/// Catalog watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Long-poll wait ceiling sent to the catalog (in seconds)
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,

    /// Delay before re-polling after a failed watch (in seconds)
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

impl WatcherConfig {
    /// Long-poll wait ceiling
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }

    /// Delay after a failed watch
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.wait_time_secs == 0 {
            return Err(crate::Error::config("Watch wait time must be > 0"));
        }
        Ok(())
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            wait_time_secs: default_wait_time_secs(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// What to do when two desired records derive the same identity
    #[serde(default)]
    pub on_duplicate: DuplicatePolicy,

    /// Upper bound for a single catalog write or delete (in seconds)
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    /// Capacity of the controller event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl WriterConfig {
    /// Upper bound for a single catalog call
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.write_timeout_secs == 0 {
            return Err(crate::Error::config("Write timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            on_duplicate: DuplicatePolicy::default(),
            write_timeout_secs: default_write_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Behavior when two desired records derive the same service or check ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Stop the controller with an error
    Quit,
    /// Keep the first record, log and drop the later one
    #[default]
    IgnoreSkipLast,
}

impl DuplicatePolicy {
    /// Configuration name of the policy
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Quit => "quit",
            DuplicatePolicy::IgnoreSkipLast => "ignore-skip-last",
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicatePolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quit" => Ok(DuplicatePolicy::Quit),
            "ignore-skip-last" => Ok(DuplicatePolicy::IgnoreSkipLast),
            other => Err(crate::Error::config(format!(
                "Unknown on-duplicate mode '{}' (expected 'quit' or 'ignore-skip-last')",
                other
            ))),
        }
    }
}

/// Parse `key=value` entries into a filter map
///
/// The value keeps its commas; it is split into an allow-list when the
/// filter is applied.
pub fn parse_filters(entries: &[String]) -> Result<Filters, crate::Error> {
    let mut filters = Filters::new();

    for entry in entries {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| crate::Error::config(format!("Malformed filter '{}', expected key=value", entry)))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(crate::Error::config(format!("Filter '{}' has an empty key", entry)));
        }

        if filters.insert(key.to_string(), value.trim().to_string()).is_some() {
            return Err(crate::Error::config(format!("Filter key '{}' given more than once", key)));
        }
    }

    Ok(filters)
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_page_size() -> usize {
    100
}

fn default_max_consecutive_errors() -> usize {
    10
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_tag_cache_secs() -> u64 {
    1800
}

fn default_wait_time_secs() -> u64 {
    120
}

fn default_error_backoff_secs() -> u64 {
    10
}

fn default_write_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    1000
}
