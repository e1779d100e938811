//! Catalog service records
//!
//! A [`ServiceRecord`] is one catalog service plus its health check. It is
//! both what the writer registers and what the catalog tracker reads back,
//! so the two sides can be compared field by field.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Meta key carrying the identifier of the cloud resource a record was derived from
pub const RESOURCE_META_KEY: &str = "ResourceIdentifier";

/// Prefix of the provenance line appended to `check_output` on every write
const LAST_UPDATE_PREFIX: &str = "\n\nLast update: ";

/// RFC 1123 with numeric zone, e.g. "Tue, 02 Jan 2024 03:04:05 +0000"
const LAST_UPDATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

static LAST_UPDATE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("\n\nLast update: .+").expect("last update pattern is a valid regex")
});

/// Health check status of a catalog record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Resource is serving
    #[default]
    Passing,
    /// Resource is serving but degraded or changing
    Warning,
    /// Resource must not receive traffic
    Critical,
}

impl CheckStatus {
    /// Catalog wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Passing => "passing",
            CheckStatus::Warning => "warning",
            CheckStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passing" => Ok(CheckStatus::Passing),
            "warning" => Ok(CheckStatus::Warning),
            "critical" => Ok(CheckStatus::Critical),
            other => Err(crate::Error::Other(format!("Unknown check status: {}", other))),
        }
    }
}

/// One catalog service entry together with its health check
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Unique within a catalog node; identity for dedup and diff
    pub service_id: String,
    /// Logical service name consumers look up
    pub service_name: String,
    /// Endpoint address
    pub address: String,
    /// Endpoint port
    pub port: u16,
    /// Service tags (order is not significant)
    pub tags: Vec<String>,
    /// Service metadata
    pub meta: BTreeMap<String, String>,
    /// Health check identity
    pub check_id: String,
    /// Node the check is registered on
    pub check_node: String,
    /// Health check status
    pub check_status: CheckStatus,
    /// Human-readable check notes
    pub check_notes: String,
    /// Free text output; carries a trailing "Last update" line once written
    pub check_output: String,
}

impl ServiceRecord {
    /// Create a record with identity, name and endpoint set
    pub fn new(
        service_id: impl Into<String>,
        service_name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        let service_id = service_id.into();
        Self {
            check_id: format!("service:{}", service_id),
            service_id,
            service_name: service_name.into(),
            address: address.into(),
            port,
            ..Default::default()
        }
    }

    /// Names of the fields that differ between two records
    ///
    /// Tags compare as sets and `check_output` compares without its
    /// "Last update" line, so re-stamping a record never makes it differ.
    pub fn differences(&self, other: &ServiceRecord) -> Vec<&'static str> {
        let mut fields = Vec::new();

        if self.service_id != other.service_id {
            fields.push("service_id");
        }
        if self.service_name != other.service_name {
            fields.push("service_name");
        }
        if self.address != other.address {
            fields.push("address");
        }
        if self.port != other.port {
            fields.push("port");
        }
        if self.tag_set() != other.tag_set() {
            fields.push("tags");
        }
        if self.meta != other.meta {
            fields.push("meta");
        }
        if self.check_id != other.check_id {
            fields.push("check_id");
        }
        if self.check_node != other.check_node {
            fields.push("check_node");
        }
        if self.check_status != other.check_status {
            fields.push("check_status");
        }
        if self.check_notes != other.check_notes {
            fields.push("check_notes");
        }
        if strip_last_update(&self.check_output) != strip_last_update(&other.check_output) {
            fields.push("check_output");
        }

        fields
    }

    /// Whether two records are the same for write-avoidance purposes
    pub fn is_identical(&self, other: &ServiceRecord) -> bool {
        self.differences(other).is_empty()
    }

    /// Append the "Last update" provenance line, replacing any previous one
    pub fn stamp_last_update(&mut self, at: DateTime<Utc>) {
        let base = strip_last_update(&self.check_output).into_owned();
        self.check_output = format!("{}{}{}", base, LAST_UPDATE_PREFIX, at.format(LAST_UPDATE_FORMAT));
    }

    fn tag_set(&self) -> BTreeSet<&str> {
        self.tags.iter().map(String::as_str).collect()
    }
}

/// Remove the "Last update" line from a check output
pub fn strip_last_update(output: &str) -> Cow<'_, str> {
    LAST_UPDATE_LINE.replace_all(output, "")
}
