// Consul HTTP API payloads
//
// Only the fields the controller reads or writes are modelled. Consul
// sends `null` for empty tag lists and meta maps, so those are optional
// on the read side.

use dyncat_core::{CheckStatus, NodeSnapshot, ServiceRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Agent check every node carries; never managed by the controller
pub(crate) const SERF_HEALTH_CHECK: &str = "serfHealth";

/// Body of `PUT /v1/catalog/register`
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CatalogRegistration<'a> {
    pub node: &'a str,
    pub address: &'a str,
    pub service: AgentService<'a>,
    pub check: AgentCheck<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AgentService<'a> {
    #[serde(rename = "ID")]
    pub id: &'a str,
    pub service: &'a str,
    pub address: &'a str,
    pub port: u16,
    pub tags: &'a [String],
    pub meta: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AgentCheck<'a> {
    #[serde(rename = "CheckID")]
    pub check_id: &'a str,
    pub name: &'a str,
    pub node: &'a str,
    pub notes: &'a str,
    pub service_name: &'a str,
    #[serde(rename = "ServiceID")]
    pub service_id: &'a str,
    pub status: &'static str,
    pub output: &'a str,
}

impl<'a> CatalogRegistration<'a> {
    /// Registration of a record on the node its check belongs to
    pub(crate) fn from_record(record: &'a ServiceRecord) -> Self {
        Self {
            node: &record.check_node,
            address: &record.address,
            service: AgentService {
                id: &record.service_id,
                service: &record.service_name,
                address: &record.address,
                port: record.port,
                tags: &record.tags,
                meta: &record.meta,
            },
            check: AgentCheck {
                check_id: &record.check_id,
                name: &record.service_name,
                node: &record.check_node,
                notes: &record.check_notes,
                service_name: &record.service_name,
                service_id: &record.service_id,
                status: record.check_status.as_str(),
                output: &record.check_output,
            },
        }
    }
}

/// Body of `PUT /v1/catalog/deregister`
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CatalogDeregistration<'a> {
    pub node: &'a str,
    #[serde(rename = "ServiceID", skip_serializing_if = "Option::is_none")]
    pub service_id: Option<&'a str>,
    #[serde(rename = "CheckID", skip_serializing_if = "Option::is_none")]
    pub check_id: Option<&'a str>,
}

/// Response of `GET /v1/internal/ui/node/<node>`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct NodeInfo {
    #[serde(default)]
    pub services: Option<Vec<NodeService>>,
    #[serde(default)]
    pub checks: Option<Vec<NodeCheck>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct NodeService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub meta: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct NodeCheck {
    #[serde(rename = "CheckID")]
    pub check_id: String,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub notes: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
}

impl NodeInfo {
    /// Fold the node's services and checks into one record per service
    pub(crate) fn into_snapshot(self, index: u64) -> NodeSnapshot {
        let mut services: HashMap<String, ServiceRecord> = self
            .services
            .unwrap_or_default()
            .into_iter()
            .map(|service| {
                let record = ServiceRecord {
                    service_id: service.id.clone(),
                    service_name: service.service,
                    address: service.address,
                    port: service.port,
                    tags: service.tags.unwrap_or_default(),
                    meta: service.meta.unwrap_or_default(),
                    ..Default::default()
                };
                (service.id, record)
            })
            .collect();

        for check in self.checks.unwrap_or_default() {
            if check.check_id == SERF_HEALTH_CHECK {
                continue;
            }

            let Some(record) = services.get_mut(&check.service_id) else {
                tracing::warn!(
                    check_id = %check.check_id,
                    service_id = %check.service_id,
                    "Ignoring catalog check that belongs to no known service"
                );
                continue;
            };

            record.check_status = check.status.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    check_id = %check.check_id,
                    status = %check.status,
                    "Unknown check status, treating as critical"
                );
                CheckStatus::Critical
            });
            record.check_id = check.check_id;
            record.check_node = check.node;
            record.check_output = check.output;
            record.check_notes = check.notes;
        }

        NodeSnapshot { services, index }
    }
}
