//! RDS DB instances
//!
//! One catalog service per instance. Replication role decides the service
//! ID and tags:
//!
//! | Role                     | Service ID                        | Tags               |
//! |--------------------------|-----------------------------------|--------------------|
//! | read replica             | `<name>-<instance>-<replica tag>` | replica            |
//! | source of read replicas  | `<name>-<master tag>`             | master             |
//! | standalone               | `<name>`                          | master, replica    |

use dyncat_core::traits::Resource;
use dyncat_core::{CheckStatus, Error, Result, ServiceMapper, ServiceRecord, Tags};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::{MANAGED_BY, NamingOptions, SERVICE_NAME_TAG, deserialize_tags};

/// Instance status while the instance is still being provisioned
const CREATING: &str = "creating";

/// Network endpoint of an instance
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DbSubnetGroup {
    #[serde(default)]
    pub vpc_id: Option<String>,
}

/// An RDS DB instance as returned by `DescribeDBInstances`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DbInstance {
    #[serde(rename = "DBInstanceIdentifier")]
    pub db_instance_identifier: String,
    #[serde(rename = "DBInstanceArn", default)]
    pub db_instance_arn: Option<String>,
    #[serde(rename = "DBInstanceClass", default)]
    pub db_instance_class: Option<String>,
    #[serde(rename = "DBInstanceStatus")]
    pub db_instance_status: String,
    #[serde(rename = "DBName", default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub engine_version: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
    #[serde(rename = "DBSubnetGroup", default)]
    pub db_subnet_group: Option<DbSubnetGroup>,
    #[serde(rename = "ReadReplicaSourceDBInstanceIdentifier", default)]
    pub read_replica_source: Option<String>,
    #[serde(rename = "ReadReplicaDBInstanceIdentifiers", default)]
    pub read_replicas: Vec<String>,
    #[serde(default)]
    pub pending_modified_values: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(rename = "TagList", default, deserialize_with = "deserialize_tags")]
    pub tags: Tags,
}

impl DbInstance {
    /// Whether this instance replicates from another one
    pub fn is_replica(&self) -> bool {
        self.read_replica_source.is_some()
    }

    /// Whether other instances replicate from this one
    pub fn is_master(&self) -> bool {
        !self.read_replicas.is_empty()
    }
}

impl Resource for DbInstance {
    const KIND: &'static str = "rds";
    const FILTER_KEYS: &'static [&'static str] = &[
        "AvailabilityZone",
        "DBInstanceArn",
        "DBInstanceClass",
        "DBInstanceIdentifier",
        "DBInstanceStatus",
        "Engine",
        "EngineVersion",
        "VpcId",
    ];

    fn identifier(&self) -> &str {
        &self.db_instance_identifier
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "AvailabilityZone" => self.availability_zone.as_deref(),
            "DBInstanceArn" => self.db_instance_arn.as_deref(),
            "DBInstanceClass" => self.db_instance_class.as_deref(),
            "DBInstanceIdentifier" => Some(&self.db_instance_identifier),
            "DBInstanceStatus" => Some(&self.db_instance_status),
            "Engine" => self.engine.as_deref(),
            "EngineVersion" => self.engine_version.as_deref(),
            "VpcId" => self
                .db_subnet_group
                .as_ref()
                .and_then(|group| group.vpc_id.as_deref()),
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

/// Health of an instance derived from its status
pub fn check_status(status: &str) -> CheckStatus {
    match status {
        "backing-up" | "available" | "maintenance" | "modifying" | "rebooting"
        | "storage-optimization" => CheckStatus::Passing,
        "creating"
        | "deleting"
        | "failed"
        | "renaming"
        | "restore-error"
        | "inaccessible-encryption-credentials"
        | "incompatible-credentials"
        | "incompatible-network"
        | "incompatible-option-group"
        | "incompatible-parameters"
        | "incompatible-restore" => CheckStatus::Critical,
        "resetting-master-credentials" | "storage-full" | "upgrading" => CheckStatus::Warning,
        _ => CheckStatus::Passing,
    }
}

/// Naming policy for RDS instances
#[derive(Debug, Clone)]
pub struct RdsMapper {
    node_name: String,
    naming: NamingOptions,
}

impl RdsMapper {
    pub fn new(node_name: impl Into<String>, naming: NamingOptions) -> Self {
        Self {
            node_name: node_name.into(),
            naming,
        }
    }

    fn service_name(&self, instance: &DbInstance) -> Option<String> {
        if let Some(name) = instance.tags.get(SERVICE_NAME_TAG) {
            return Some(self.naming.service_name(name));
        }

        instance
            .db_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .map(|name| self.naming.service_name(name))
    }
}

impl ServiceMapper for RdsMapper {
    type Resource = DbInstance;

    fn map(&self, instance: &DbInstance) -> Result<Vec<ServiceRecord>> {
        let identifier = &instance.db_instance_identifier;

        if instance.db_instance_status == CREATING {
            return Err(Error::provisioning(identifier, "instance is being created"));
        }

        let name = self.service_name(instance).ok_or_else(|| {
            Error::incomplete(
                identifier,
                format!("no '{}' tag and no DBName", SERVICE_NAME_TAG),
            )
        })?;

        let endpoint = instance.endpoint.as_ref().ok_or_else(|| {
            Error::incomplete(
                identifier,
                format!("no endpoint yet, instance is {}", instance.db_instance_status),
            )
        })?;

        let mut id = name.clone();
        let mut tags = Vec::new();

        if instance.is_replica() {
            tags.push(self.naming.replica_tag.clone());
            id = format!("{}-{}-{}", id, identifier, self.naming.replica_tag);
        }

        if instance.is_master() {
            tags.push(self.naming.master_tag.clone());
            id = format!("{}-{}", id, self.naming.master_tag);
        }

        if !instance.is_replica() && !instance.is_master() {
            tags.push(self.naming.master_tag.clone());
            tags.push(self.naming.replica_tag.clone());
        }

        let pending = serde_json::Value::Object(
            instance.pending_modified_values.clone().unwrap_or_default(),
        );

        let mut record = ServiceRecord::new(&id, &name, &endpoint.address, endpoint.port);
        record.tags = tags;
        record.meta = BTreeMap::from([
            ("Engine".to_string(), instance.engine.clone().unwrap_or_default()),
            (
                "EngineVersion".to_string(),
                instance.engine_version.clone().unwrap_or_default(),
            ),
            ("DBName".to_string(), instance.db_name.clone().unwrap_or_default()),
            (
                "DBInstanceClass".to_string(),
                instance.db_instance_class.clone().unwrap_or_default(),
            ),
            ("DBInstanceIdentifier".to_string(), identifier.clone()),
        ]);
        record.check_node = self.node_name.clone();
        record.check_status = check_status(&instance.db_instance_status);
        record.check_notes = format!("RDS Instance Status: {}", instance.db_instance_status);
        record.check_output = format!(
            "Pending tasks: {}\n\nAddr: {}\n\n{}",
            pending, endpoint.address, MANAGED_BY
        );

        Ok(vec![record])
    }
}
