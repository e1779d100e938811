// # dyncat-aws
//
// AWS resource kinds and the naming policy that turns each of them into
// catalog service records.
//
// ## Kinds
//
// - **rds**: RDS DB instances (`DescribeDBInstances`)
// - **kafka**: MSK clusters (`ListClustersV2` + bootstrap brokers)
// - **elasticache**: ElastiCache cache clusters (`DescribeCacheClusters` + replication group)
//
// Descriptors deserialize from the PascalCase JSON the AWS APIs return, so
// any `ResourceSource` that can produce that JSON can feed a controller.

pub mod elasticache;
pub mod kafka;
pub mod rds;

use dyncat_core::Tags;
use serde::{Deserialize, Deserializer};

pub use elasticache::{CacheCluster, ElastiCacheMapper};
pub use kafka::{KafkaMapper, MskCluster};
pub use rds::{DbInstance, RdsMapper};

/// Tag that overrides the derived service name
pub const SERVICE_NAME_TAG: &str = "consul_service_name";

/// Last line of every check output written by the controller
pub const MANAGED_BY: &str = "managed by dyncat";

/// Service naming shared by every resource kind
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NamingOptions {
    /// Prepended to every service name
    #[serde(default)]
    pub prefix: String,

    /// Appended to every service name
    #[serde(default)]
    pub suffix: String,

    /// Tag for RDS instances that have read replicas
    #[serde(default = "default_master_tag")]
    pub master_tag: String,

    /// Tag for replicas (RDS read replicas, ElastiCache replica nodes)
    #[serde(default = "default_replica_tag")]
    pub replica_tag: String,

    /// Tag for ElastiCache primary nodes
    #[serde(default = "default_primary_tag")]
    pub primary_tag: String,

    /// Tag for nodes of cluster-mode ElastiCache replication groups
    #[serde(default = "default_cluster_tag")]
    pub cluster_tag: String,
}

fn default_master_tag() -> String {
    "master".to_string()
}

fn default_replica_tag() -> String {
    "replica".to_string()
}

fn default_primary_tag() -> String {
    "primary".to_string()
}

fn default_cluster_tag() -> String {
    "cluster".to_string()
}

impl Default for NamingOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            master_tag: default_master_tag(),
            replica_tag: default_replica_tag(),
            primary_tag: default_primary_tag(),
            cluster_tag: default_cluster_tag(),
        }
    }
}

impl NamingOptions {
    /// Wrap a base name in the configured prefix and suffix
    pub fn service_name(&self, base: &str) -> String {
        format!("{}{}{}", self.prefix, base, self.suffix)
    }
}

/// Tags arrive either as `[{"Key": .., "Value": ..}]` (RDS, ElastiCache)
/// or as a plain object (MSK)
#[derive(Deserialize)]
#[serde(untagged)]
enum TagsRepr {
    List(Vec<TagEntry>),
    Map(Tags),
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagEntry {
    key: String,
    #[serde(default)]
    value: String,
}

pub(crate) fn deserialize_tags<'de, D>(deserializer: D) -> Result<Tags, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<TagsRepr>::deserialize(deserializer)? {
        Some(TagsRepr::List(entries)) => entries
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect(),
        Some(TagsRepr::Map(tags)) => tags,
        None => Tags::new(),
    })
}
