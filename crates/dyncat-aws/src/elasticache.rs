//! ElastiCache cache clusters
//!
//! One catalog service per cache node. The replication group decides the
//! role: cluster-mode groups tag every node with the cluster tag, other
//! groups tag each node primary or replica from its current role.

use dyncat_core::traits::Resource;
use dyncat_core::{CheckStatus, Error, Result, ServiceMapper, ServiceRecord, Tags};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::{MANAGED_BY, NamingOptions, SERVICE_NAME_TAG, deserialize_tags};

const CREATING: &str = "creating";

/// Tags joined into `<stack>-<environment>-<name>` when no name tag is set
const NAME_PART_TAGS: [&str; 3] = ["stack", "environment", "name"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheNode {
    pub cache_node_id: String,
    #[serde(default)]
    pub cache_node_status: Option<String>,
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeGroupMember {
    pub cache_cluster_id: String,
    #[serde(default)]
    pub cache_node_id: Option<String>,
    #[serde(default)]
    pub current_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeGroup {
    #[serde(default)]
    pub node_group_members: Vec<NodeGroupMember>,
}

/// Replication group the cluster belongs to (`DescribeReplicationGroups`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicationGroup {
    #[serde(default)]
    pub cluster_enabled: bool,
    #[serde(default)]
    pub node_groups: Vec<NodeGroup>,
}

impl ReplicationGroup {
    /// Current role ("primary" or "replica") of a node of a member cluster
    pub fn role_of(&self, cluster_id: &str, node_id: &str) -> Option<&str> {
        self.node_groups
            .iter()
            .flat_map(|group| &group.node_group_members)
            .find(|member| {
                member.cache_cluster_id == cluster_id
                    && member
                        .cache_node_id
                        .as_deref()
                        .is_none_or(|id| id == node_id)
            })
            .and_then(|member| member.current_role.as_deref())
    }
}

/// A cache cluster as returned by `DescribeCacheClusters` with node info
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheCluster {
    pub cache_cluster_id: String,
    pub cache_cluster_status: String,
    #[serde(default)]
    pub cache_node_type: Option<String>,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub engine_version: Option<String>,
    #[serde(default)]
    pub replication_group_id: Option<String>,
    #[serde(default)]
    pub preferred_availability_zone: Option<String>,
    #[serde(default)]
    pub cache_nodes: Vec<CacheNode>,
    #[serde(default)]
    pub replication_group: Option<ReplicationGroup>,
    #[serde(rename = "TagList", default, deserialize_with = "deserialize_tags")]
    pub tags: Tags,
}

impl Resource for CacheCluster {
    const KIND: &'static str = "elasticache";
    const FILTER_KEYS: &'static [&'static str] = &[
        "CacheClusterId",
        "CacheNodeType",
        "Engine",
        "EngineVersion",
        "ReplicationGroupId",
        "PreferredAvailabilityZone",
        "CacheClusterStatus",
    ];

    fn identifier(&self) -> &str {
        &self.cache_cluster_id
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "CacheClusterId" => Some(&self.cache_cluster_id),
            "CacheNodeType" => self.cache_node_type.as_deref(),
            "Engine" => self.engine.as_deref(),
            "EngineVersion" => self.engine_version.as_deref(),
            "ReplicationGroupId" => self.replication_group_id.as_deref(),
            "PreferredAvailabilityZone" => self.preferred_availability_zone.as_deref(),
            "CacheClusterStatus" => Some(&self.cache_cluster_status),
            _ => None,
        }
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn set_tags(&mut self, tags: Tags) {
        self.tags = tags;
    }
}

/// Health of a cache cluster derived from its status
pub fn check_status(status: &str) -> CheckStatus {
    match status {
        "available" | "modifying" | "snapshotting" => CheckStatus::Passing,
        "creating" | "rebooting cluster nodes" | "deleting" | "deleted" | "restore-failed" => {
            CheckStatus::Critical
        }
        "incompatible-network" => CheckStatus::Warning,
        _ => CheckStatus::Passing,
    }
}

/// Naming policy for ElastiCache clusters
#[derive(Debug, Clone)]
pub struct ElastiCacheMapper {
    node_name: String,
    naming: NamingOptions,
}

impl ElastiCacheMapper {
    pub fn new(node_name: impl Into<String>, naming: NamingOptions) -> Self {
        Self {
            node_name: node_name.into(),
            naming,
        }
    }

    fn service_name(&self, cluster: &CacheCluster) -> String {
        if let Some(name) = cluster.tags.get(SERVICE_NAME_TAG) {
            return self.naming.service_name(name);
        }

        let parts: Option<Vec<&str>> = NAME_PART_TAGS
            .iter()
            .map(|key| cluster.tags.get(*key).map(String::as_str))
            .collect();
        if let Some(parts) = parts {
            return self.naming.service_name(&parts.join("-"));
        }

        let base = cluster
            .replication_group_id
            .as_deref()
            .unwrap_or(&cluster.cache_cluster_id);
        self.naming.service_name(base)
    }

    /// Role tags for one node
    fn role_tags(&self, cluster: &CacheCluster, node: &CacheNode) -> Vec<String> {
        let Some(group) = &cluster.replication_group else {
            return Vec::new();
        };

        if group.cluster_enabled {
            return vec![self.naming.cluster_tag.clone()];
        }

        match group.role_of(&cluster.cache_cluster_id, &node.cache_node_id) {
            Some("primary") => vec![self.naming.primary_tag.clone()],
            Some("replica") => vec![self.naming.replica_tag.clone()],
            _ => Vec::new(),
        }
    }
}

impl ServiceMapper for ElastiCacheMapper {
    type Resource = CacheCluster;

    fn map(&self, cluster: &CacheCluster) -> Result<Vec<ServiceRecord>> {
        let identifier = &cluster.cache_cluster_id;

        if cluster.cache_cluster_status == CREATING {
            return Err(Error::provisioning(identifier, "cluster is being created"));
        }

        if cluster.cache_nodes.is_empty() {
            return Err(Error::incomplete(
                identifier,
                format!("no cache nodes yet, cluster is {}", cluster.cache_cluster_status),
            ));
        }

        let name = self.service_name(cluster);
        let status = check_status(&cluster.cache_cluster_status);

        let mut records = Vec::with_capacity(cluster.cache_nodes.len());
        for (index, node) in cluster.cache_nodes.iter().enumerate() {
            let endpoint = node.endpoint.as_ref().ok_or_else(|| {
                Error::incomplete(
                    identifier,
                    format!("cache node {} has no endpoint yet", node.cache_node_id),
                )
            })?;

            let tags = self.role_tags(cluster, node);
            let mut id = format!("{}-{}", identifier, index);
            for tag in &tags {
                id = format!("{}-{}", id, tag);
            }

            let mut record = ServiceRecord::new(&id, &name, &endpoint.address, endpoint.port);
            record.tags = tags;
            record.meta = BTreeMap::from([
                ("CacheClusterId".to_string(), identifier.clone()),
                ("CacheNodeId".to_string(), node.cache_node_id.clone()),
                (
                    "CacheNodeType".to_string(),
                    cluster.cache_node_type.clone().unwrap_or_default(),
                ),
                ("Engine".to_string(), cluster.engine.clone().unwrap_or_default()),
                (
                    "EngineVersion".to_string(),
                    cluster.engine_version.clone().unwrap_or_default(),
                ),
                (
                    "ReplicationGroupId".to_string(),
                    cluster.replication_group_id.clone().unwrap_or_default(),
                ),
            ]);
            record.check_node = self.node_name.clone();
            record.check_status = status;
            record.check_notes = format!("ElastiCache Cluster Status: {}", cluster.cache_cluster_status);
            record.check_output = format!(
                "Node: {}\n\nAddr: {}\n\n{}",
                node.cache_node_id, endpoint.address, MANAGED_BY
            );
            records.push(record);
        }

        Ok(records)
    }
}
