//! MSK (Kafka) clusters
//!
//! One catalog service per bootstrap broker, numbered in broker order.

use dyncat_core::traits::{MatchMode, Resource};
use dyncat_core::{CheckStatus, Error, Result, ServiceMapper, ServiceRecord, Tags};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::{MANAGED_BY, NamingOptions, SERVICE_NAME_TAG, deserialize_tags};

const CREATING: &str = "CREATING";

/// An MSK cluster as returned by `ListClustersV2`, with its bootstrap
/// broker string from `GetBootstrapBrokers` attached
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MskCluster {
    pub cluster_arn: String,
    pub cluster_name: String,
    pub state: String,
    #[serde(default)]
    pub current_version: Option<String>,
    /// Comma separated `host:port` list
    #[serde(default)]
    pub bootstrap_broker_string: Option<String>,
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Tags,
}

/// One bootstrap broker endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub host: String,
    pub port: u16,
}

impl MskCluster {
    /// Parse the bootstrap broker string
    pub fn brokers(&self) -> Result<Vec<Broker>> {
        let Some(brokers) = self.bootstrap_broker_string.as_deref() else {
            return Ok(Vec::new());
        };

        brokers
            .split(',')
            .map(str::trim)
            .filter(|broker| !broker.is_empty())
            .map(|broker| {
                let (host, port) = broker.rsplit_once(':').ok_or_else(|| {
                    Error::incomplete(&self.cluster_arn, format!("broker '{}' has no port", broker))
                })?;
                let port = port.parse::<u16>().map_err(|e| {
                    Error::incomplete(
                        &self.cluster_arn,
                        format!("broker '{}' has an invalid port: {}", broker, e),
                    )
                })?;
                Ok(Broker {
                    host: host.to_string(),
                    port,
                })
            })
            .collect()
    }
}

impl Resource for MskCluster {
    const KIND: &'static str = "kafka";
    const FILTER_KEYS: &'static [&'static str] = &["ClusterArn", "ClusterName"];

    fn identifier(&self) -> &str {
        &self.cluster_arn
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "ClusterArn" => Some(&self.cluster_arn),
            "ClusterName" => Some(&self.cluster_name),
            _ => None,
        }
    }

    fn match_mode(key: &str) -> MatchMode {
        match key {
            "ClusterName" => MatchMode::Prefix,
            _ => MatchMode::Exact,
        }
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn set_tags(&mut self, tags: Tags) {
        self.tags = tags;
    }
}

/// Health of a cluster derived from its state
pub fn check_status(state: &str) -> CheckStatus {
    match state {
        "ACTIVE" => CheckStatus::Passing,
        "UPDATING" | "MAINTENANCE" | "HEALING" | "REBOOTING_BROKER" => CheckStatus::Warning,
        "CREATING" | "DELETING" | "FAILED" => CheckStatus::Critical,
        _ => CheckStatus::Passing,
    }
}

/// Naming policy for MSK clusters
#[derive(Debug, Clone)]
pub struct KafkaMapper {
    node_name: String,
    naming: NamingOptions,
}

impl KafkaMapper {
    pub fn new(node_name: impl Into<String>, naming: NamingOptions) -> Self {
        Self {
            node_name: node_name.into(),
            naming,
        }
    }

    fn service_name(&self, cluster: &MskCluster) -> Option<String> {
        if let Some(name) = cluster.tags.get(SERVICE_NAME_TAG) {
            return Some(self.naming.service_name(name));
        }

        Some(cluster.cluster_name.as_str())
            .filter(|name| !name.is_empty())
            .map(|name| self.naming.service_name(name))
    }
}

impl ServiceMapper for KafkaMapper {
    type Resource = MskCluster;

    fn map(&self, cluster: &MskCluster) -> Result<Vec<ServiceRecord>> {
        let identifier = &cluster.cluster_arn;

        if cluster.state == CREATING {
            return Err(Error::provisioning(identifier, "cluster is being created"));
        }

        let name = self.service_name(cluster).ok_or_else(|| {
            Error::incomplete(identifier, format!("no '{}' tag and no cluster name", SERVICE_NAME_TAG))
        })?;

        let brokers = cluster.brokers()?;
        if brokers.is_empty() {
            return Err(Error::incomplete(
                identifier,
                format!("no bootstrap brokers yet, cluster is {}", cluster.state),
            ));
        }

        let status = check_status(&cluster.state);

        Ok(brokers
            .iter()
            .enumerate()
            .map(|(index, broker)| {
                let id = format!("{}-{}", name, index);
                let mut record = ServiceRecord::new(&id, &name, &broker.host, broker.port);
                record.meta = BTreeMap::from([
                    ("ClusterName".to_string(), cluster.cluster_name.clone()),
                    ("ClusterArn".to_string(), cluster.cluster_arn.clone()),
                    (
                        "KafkaVersion".to_string(),
                        cluster.current_version.clone().unwrap_or_default(),
                    ),
                ]);
                record.check_node = self.node_name.clone();
                record.check_status = status;
                record.check_notes = format!("MSK Cluster State: {}", cluster.state);
                record.check_output = format!(
                    "Broker: {}:{}\n\n{}",
                    broker.host, broker.port, MANAGED_BY
                );
                record
            })
            .collect())
    }
}
