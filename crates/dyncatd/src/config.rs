//! Daemon configuration from environment variables
//!
//! Everything is read once at startup and validated before the runtime
//! starts. Per-kind variables use the upper-cased kind name, e.g.
//! `DYNCAT_RDS_NODE_NAME` or `DYNCAT_KAFKA_INSTANCE_FILTER`.

use anyhow::{Context, Result, bail};
use dyncat_aws::NamingOptions;
use dyncat_core::config::parse_filters;
use dyncat_core::{ControllerConfig, DuplicatePolicy, FetcherConfig, FilterConfig, Filters};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

/// Resource kinds the daemon can mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Rds,
    Kafka,
    ElastiCache,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Rds, Kind::Kafka, Kind::ElastiCache];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Rds => "rds",
            Kind::Kafka => "kafka",
            Kind::ElastiCache => "elasticache",
        }
    }

    fn env_name(&self) -> String {
        self.as_str().to_uppercase()
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rds" => Ok(Kind::Rds),
            "kafka" | "msk" => Ok(Kind::Kafka),
            "elasticache" => Ok(Kind::ElastiCache),
            other => bail!(
                "Unknown resource kind '{}'. Supported kinds: rds, kafka, elasticache, all",
                other
            ),
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Daemon configuration
pub struct Config {
    pub kinds: Vec<Kind>,
    pub check_interval_secs: u64,
    pub tag_cache_secs: u64,
    pub page_size: u64,
    pub on_duplicate: DuplicatePolicy,
    instance_filters: Vec<(Option<Kind>, Filters)>,
    tag_filters: Vec<(Option<Kind>, Filters)>,
    node_names: Vec<(Kind, String)>,
    pub naming: NamingOptions,
    pub inventory_dir: PathBuf,
    pub log_level: Level,
    pub log_format: LogFormat,
    pub dry_run: bool,
    pub consul_addr: Option<String>,
    /// ⚠️ NEVER log this value
    pub consul_token: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("kinds", &self.kinds)
            .field("check_interval_secs", &self.check_interval_secs)
            .field("page_size", &self.page_size)
            .field("on_duplicate", &self.on_duplicate)
            .field("inventory_dir", &self.inventory_dir)
            .field("dry_run", &self.dry_run)
            .field("consul_addr", &self.consul_addr)
            .field("consul_token", &self.consul_token.as_ref().map(|_| "<REDACTED>"))
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let kinds = parse_kinds(var("DYNCAT_KINDS").as_deref().unwrap_or("rds"))?;

        let check_interval_secs = parse_number(&var, "DYNCAT_CHECK_INTERVAL_SECS", 60)?;
        let tag_cache_secs = parse_number(&var, "DYNCAT_TAG_CACHE_SECS", 1800)?;
        let page_size = parse_number(&var, "DYNCAT_PAGE_SIZE", 100)?;

        let on_duplicate = match var("DYNCAT_ON_DUPLICATE") {
            Some(mode) => mode.parse::<DuplicatePolicy>()?,
            None => DuplicatePolicy::default(),
        };

        let mut instance_filters = vec![(None, filters(&var, "DYNCAT_INSTANCE_FILTER")?)];
        let mut tag_filters = vec![(None, filters(&var, "DYNCAT_TAG_FILTER")?)];
        let mut node_names = Vec::new();
        for kind in Kind::ALL {
            let prefix = format!("DYNCAT_{}", kind.env_name());
            instance_filters.push((Some(kind), filters(&var, &format!("{}_INSTANCE_FILTER", prefix))?));
            tag_filters.push((Some(kind), filters(&var, &format!("{}_TAG_FILTER", prefix))?));
            node_names.push((
                kind,
                var(&format!("{}_NODE_NAME", prefix)).unwrap_or_else(|| kind.as_str().to_string()),
            ));
        }

        let defaults = NamingOptions::default();
        let naming = NamingOptions {
            prefix: var("DYNCAT_SERVICE_PREFIX").unwrap_or_default(),
            suffix: var("DYNCAT_SERVICE_SUFFIX").unwrap_or_default(),
            master_tag: var("DYNCAT_MASTER_TAG").unwrap_or(defaults.master_tag),
            replica_tag: var("DYNCAT_REPLICA_TAG").unwrap_or(defaults.replica_tag),
            primary_tag: var("DYNCAT_PRIMARY_TAG").unwrap_or(defaults.primary_tag),
            cluster_tag: var("DYNCAT_CLUSTER_TAG").unwrap_or(defaults.cluster_tag),
        };

        let log_level = match var("DYNCAT_LOG_LEVEL")
            .unwrap_or_else(|| "info".to_string())
            .to_lowercase()
            .as_str()
        {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            other => bail!(
                "DYNCAT_LOG_LEVEL '{}' is not valid. Valid levels: trace, debug, info, warn, error",
                other
            ),
        };

        let log_format = match var("DYNCAT_LOG_FORMAT")
            .unwrap_or_else(|| "text".to_string())
            .to_lowercase()
            .as_str()
        {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => bail!("DYNCAT_LOG_FORMAT '{}' is not valid. Valid formats: text, json", other),
        };

        let dry_run = match var("DYNCAT_MODE")
            .unwrap_or_else(|| "live".to_string())
            .to_lowercase()
            .as_str()
        {
            "live" => false,
            "dry-run" => true,
            other => bail!("DYNCAT_MODE '{}' is not valid. Valid modes: live, dry-run", other),
        };

        Ok(Self {
            kinds,
            check_interval_secs,
            tag_cache_secs,
            page_size,
            on_duplicate,
            instance_filters,
            tag_filters,
            node_names,
            naming,
            inventory_dir: PathBuf::from(
                var("DYNCAT_INVENTORY_DIR").unwrap_or_else(|| "/var/lib/dyncat/inventory".to_string()),
            ),
            log_level,
            log_format,
            dry_run,
            consul_addr: var("CONSUL_HTTP_ADDR"),
            consul_token: var("CONSUL_HTTP_TOKEN"),
        })
    }

    /// Validate ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if !(1..=86_400).contains(&self.check_interval_secs) {
            bail!(
                "DYNCAT_CHECK_INTERVAL_SECS must be between 1 and 86400 seconds. Got: {}",
                self.check_interval_secs
            );
        }

        if self.tag_cache_secs > 86_400 {
            bail!(
                "DYNCAT_TAG_CACHE_SECS must be at most 86400 seconds. Got: {}",
                self.tag_cache_secs
            );
        }

        if !(1..=1000).contains(&self.page_size) {
            bail!(
                "DYNCAT_PAGE_SIZE must be between 1 and 1000. Got: {}",
                self.page_size
            );
        }

        if !self.inventory_dir.is_dir() {
            bail!(
                "DYNCAT_INVENTORY_DIR is not a directory: {}",
                self.inventory_dir.display()
            );
        }

        let mut nodes: Vec<&str> = self.kinds.iter().map(|kind| self.node_name(*kind)).collect();
        nodes.sort_unstable();
        if let Some(pair) = nodes.windows(2).find(|pair| pair[0] == pair[1]) {
            bail!(
                "Catalog node '{}' is assigned to more than one resource kind; each controller needs its own node",
                pair[0]
            );
        }

        Ok(())
    }

    /// Catalog node owned by a kind's controller
    pub fn node_name(&self, kind: Kind) -> &str {
        self.node_names
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, name)| name.as_str())
            .unwrap_or(kind.as_str())
    }

    /// Controller configuration for one kind
    ///
    /// Per-kind filters replace the shared ones when set.
    pub fn controller_config(&self, kind: Kind) -> ControllerConfig {
        let mut config = ControllerConfig::new(self.node_name(kind));
        config.filters = FilterConfig {
            instance: pick_filters(&self.instance_filters, kind),
            tags: pick_filters(&self.tag_filters, kind),
        };
        config.fetcher = FetcherConfig {
            check_interval_secs: self.check_interval_secs,
            tag_cache_secs: self.tag_cache_secs,
            page_size: self.page_size as usize,
            ..FetcherConfig::default()
        };
        config.writer.on_duplicate = self.on_duplicate;
        config
    }
}

fn parse_kinds(value: &str) -> Result<Vec<Kind>> {
    if value.trim().eq_ignore_ascii_case("all") {
        return Ok(Kind::ALL.to_vec());
    }

    let mut kinds = value
        .split(',')
        .filter(|kind| !kind.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<Kind>>>()?;
    kinds.sort_unstable();
    kinds.dedup();

    if kinds.is_empty() {
        bail!("DYNCAT_KINDS must name at least one resource kind");
    }
    Ok(kinds)
}

fn parse_number(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match var(key) {
        Some(value) => value
            .parse()
            .with_context(|| format!("{} must be a whole number. Got: {}", key, value)),
        None => Ok(default),
    }
}

/// `;`-separated `key=value` entries
fn filters(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Filters> {
    let entries: Vec<String> = var(key)
        .map(|value| value.split(';').map(str::to_string).collect())
        .unwrap_or_default();
    parse_filters(&entries).with_context(|| format!("Invalid {}", key))
}

fn pick_filters(filters: &[(Option<Kind>, Filters)], kind: Kind) -> Filters {
    filters
        .iter()
        .find(|(k, f)| *k == Some(kind) && !f.is_empty())
        .or_else(|| filters.iter().find(|(k, _)| k.is_none()))
        .map(|(_, f)| f.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    fn inventory_dir() -> String {
        env::temp_dir().display().to_string()
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.kinds, vec![Kind::Rds]);
        assert_eq!(config.check_interval_secs, 60);
        assert_eq!(config.tag_cache_secs, 1800);
        assert_eq!(config.controller_config(Kind::Rds).fetcher.page_size, 100);
        assert_eq!(config.on_duplicate, DuplicatePolicy::IgnoreSkipLast);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(!config.dry_run);
        assert_eq!(config.node_name(Kind::Rds), "rds");
        assert_eq!(config.naming, NamingOptions::default());
    }

    #[test]
    fn all_kinds() {
        let config = config(&[("DYNCAT_KINDS", "all")]).unwrap();
        assert_eq!(config.kinds, Kind::ALL.to_vec());

        let config = self::config(&[("DYNCAT_KINDS", "kafka, rds,kafka")]).unwrap();
        assert_eq!(config.kinds, vec![Kind::Rds, Kind::Kafka]);
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!(config(&[("DYNCAT_KINDS", "dynamodb")]).is_err());
        assert!(config(&[("DYNCAT_ON_DUPLICATE", "ignore-skip-first")]).is_err());
        assert!(config(&[("DYNCAT_LOG_LEVEL", "verbose")]).is_err());
        assert!(config(&[("DYNCAT_LOG_FORMAT", "xml")]).is_err());
        assert!(config(&[("DYNCAT_MODE", "maybe")]).is_err());
        assert!(config(&[("DYNCAT_CHECK_INTERVAL_SECS", "1m")]).is_err());
    }

    #[test]
    fn filters_are_split_on_semicolons() {
        let config = config(&[
            ("DYNCAT_INSTANCE_FILTER", "Engine=postgres,mysql;VpcId=vpc-1"),
            ("DYNCAT_TAG_FILTER", "env=prod"),
        ])
        .unwrap();

        let controller = config.controller_config(Kind::Rds);
        assert_eq!(controller.filters.instance.len(), 2);
        assert_eq!(controller.filters.instance["Engine"], "postgres,mysql");
        assert_eq!(controller.filters.tags["env"], "prod");
    }

    #[test]
    fn per_kind_filters_replace_shared_ones() {
        let config = config(&[
            ("DYNCAT_KINDS", "rds,kafka"),
            ("DYNCAT_INSTANCE_FILTER", "Engine=postgres"),
            ("DYNCAT_KAFKA_INSTANCE_FILTER", "ClusterName=events-"),
        ])
        .unwrap();

        assert_eq!(
            config.controller_config(Kind::Rds).filters.instance["Engine"],
            "postgres"
        );
        let kafka = config.controller_config(Kind::Kafka).filters.instance;
        assert_eq!(kafka.len(), 1);
        assert_eq!(kafka["ClusterName"], "events-");
    }

    #[test]
    fn malformed_filter_is_rejected() {
        assert!(config(&[("DYNCAT_INSTANCE_FILTER", "Engine")]).is_err());
        assert!(config(&[("DYNCAT_TAG_FILTER", "env=prod;env=dev")]).is_err());
    }

    #[test]
    fn controller_config_carries_daemon_settings() {
        let config = config(&[
            ("DYNCAT_CHECK_INTERVAL_SECS", "30"),
            ("DYNCAT_PAGE_SIZE", "25"),
            ("DYNCAT_ON_DUPLICATE", "quit"),
            ("DYNCAT_RDS_NODE_NAME", "databases"),
            ("DYNCAT_SERVICE_PREFIX", "aws-"),
            ("DYNCAT_MASTER_TAG", "primary"),
        ])
        .unwrap();

        let controller = config.controller_config(Kind::Rds);
        assert_eq!(controller.node_name, "databases");
        assert_eq!(controller.fetcher.check_interval_secs, 30);
        assert_eq!(controller.fetcher.page_size, 25);
        assert_eq!(controller.writer.on_duplicate, DuplicatePolicy::Quit);
        assert!(controller.validate().is_ok());
        assert_eq!(config.naming.prefix, "aws-");
        assert_eq!(config.naming.master_tag, "primary");
    }

    #[test]
    fn validation_checks_ranges_and_nodes() {
        let dir = inventory_dir();

        let ok = config(&[("DYNCAT_INVENTORY_DIR", dir.as_str()), ("DYNCAT_KINDS", "all")]).unwrap();
        assert!(ok.validate().is_ok());

        let zero = config(&[("DYNCAT_INVENTORY_DIR", dir.as_str()), ("DYNCAT_CHECK_INTERVAL_SECS", "0")]).unwrap();
        assert!(zero.validate().is_err());

        let shared_node = config(&[
            ("DYNCAT_INVENTORY_DIR", dir.as_str()),
            ("DYNCAT_KINDS", "rds,kafka"),
            ("DYNCAT_KAFKA_NODE_NAME", "rds"),
        ])
        .unwrap();
        assert!(shared_node.validate().is_err());

        let no_pages = config(&[("DYNCAT_INVENTORY_DIR", dir.as_str()), ("DYNCAT_PAGE_SIZE", "0")]).unwrap();
        assert!(no_pages.validate().is_err());

        let missing_dir = config(&[("DYNCAT_INVENTORY_DIR", "/nonexistent/dyncat/inventory")]).unwrap();
        assert!(missing_dir.validate().is_err());
    }

    #[test]
    fn token_not_exposed_in_debug() {
        let config = config(&[("CONSUL_HTTP_TOKEN", "secret-acl-token")]).unwrap();
        assert_eq!(config.consul_token.as_deref(), Some("secret-acl-token"));
        assert!(!format!("{:?}", config).contains("secret-acl-token"));
    }
}
