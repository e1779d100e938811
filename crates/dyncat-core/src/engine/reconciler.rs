//! Reconciler
//!
//! Converges the catalog node towards a filtered snapshot. One pass:
//!
//! 1. Lock [`CatalogState`] for the whole pass and take the `seen` set
//! 2. Derive the records of every resource, resolving duplicate identities
//! 3. Write records that are missing or differ (ignoring the timestamp line)
//! 4. Delete every service and check in `seen` that the pass did not find
//!
//! Deletion is absence-based: the catalog loses whatever the desired
//! state no longer derives.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{DuplicatePolicy, WriterConfig};
use crate::error::{Error, Result};
use crate::observable::SnapshotSubscriber;
use crate::record::{RESOURCE_META_KEY, ServiceRecord};
use crate::state::{CatalogState, SeenSet};
use crate::traits::{CatalogBackend, Resource, ServiceMapper};

use super::{ControllerEvent, EventSink};

/// Counters for one reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Records written that were not in the catalog
    pub created: usize,
    /// Records written over a differing catalog entry
    pub updated: usize,
    /// Records already identical in the catalog
    pub unchanged: usize,
    /// Resources that could not be derived this pass
    pub skipped: usize,
    /// Records dropped as duplicate identities
    pub duplicates: usize,
    /// Services deleted
    pub deleted_services: usize,
    /// Checks deleted
    pub deleted_checks: usize,
    /// Writes or deletes that failed (retried next pass)
    pub failed: usize,
}

impl PassReport {
    /// Number of writes issued
    pub fn writes(&self) -> usize {
        self.created + self.updated
    }
}

/// Diff-and-converge writer for one catalog node
pub struct Reconciler<R: Resource> {
    mapper: Arc<dyn ServiceMapper<Resource = R>>,
    backend: Arc<dyn CatalogBackend>,
    state: CatalogState,
    node: String,
    policy: DuplicatePolicy,
    write_timeout: Duration,
}

impl<R: Resource> Reconciler<R> {
    /// Create a reconciler for `node`
    pub fn new(
        mapper: Arc<dyn ServiceMapper<Resource = R>>,
        backend: Arc<dyn CatalogBackend>,
        state: CatalogState,
        node: impl Into<String>,
        config: &WriterConfig,
    ) -> Self {
        Self {
            mapper,
            backend,
            state,
            node: node.into(),
            policy: config.on_duplicate,
            write_timeout: config.write_timeout(),
        }
    }

    /// Run one reconcile pass over a filtered snapshot
    ///
    /// # Returns
    ///
    /// - `Ok(PassReport)`: The pass completed (individual write failures are counted, not returned)
    /// - `Err(Error::DuplicateIdentity)`: A duplicate was found under the `quit` policy;
    ///   nothing further was written in this pass
    pub async fn reconcile(&self, resources: &[R]) -> Result<PassReport> {
        let catalog = self.state.lock().await;
        debug!(resources = resources.len(), "Starting catalog write");

        let seen = catalog.seen();
        let mut found = SeenSet::default();
        let mut report = PassReport::default();

        for resource in resources {
            let identifier = resource.identifier();

            let records = match self.mapper.map(resource) {
                Ok(records) => records,
                Err(e) => {
                    if e.is_provisioning() {
                        warn!(resource = identifier, "Skipping {} resource for now: {}", R::KIND, e);
                    } else {
                        error!(resource = identifier, "Skipping {} resource: {}", R::KIND, e);
                    }
                    report.skipped += 1;
                    for retained in catalog.records_of_resource(identifier) {
                        found.insert_record(retained);
                    }
                    continue;
                }
            };

            for mut record in records {
                record
                    .meta
                    .insert(RESOURCE_META_KEY.to_string(), identifier.to_string());

                if let Some(field) = duplicate_field(&found, &record) {
                    let id = match field {
                        "service ID" => record.service_id.clone(),
                        _ => record.check_id.clone(),
                    };
                    error!(resource = identifier, "Found duplicate {} {}", field, id);

                    match self.policy {
                        DuplicatePolicy::Quit => {
                            return Err(Error::DuplicateIdentity {
                                field,
                                id,
                                resource: identifier.to_string(),
                            });
                        }
                        DuplicatePolicy::IgnoreSkipLast => {
                            error!("Ignoring the later record {}", record.service_id);
                            report.duplicates += 1;
                            continue;
                        }
                    }
                }
                found.insert_record(&record);

                match catalog.services.get(&record.service_id) {
                    Some(existing) => {
                        let changed = existing.differences(&record);
                        if changed.is_empty() {
                            debug!(service = %record.service_id, "Service is identical, skipping");
                            report.unchanged += 1;
                            continue;
                        }
                        info!(
                            service = %record.service_id,
                            fields = ?changed,
                            "Service differs from catalog, updating"
                        );
                        report.updated += 1;
                    }
                    None => {
                        info!(service = %record.service_id, "Service not in catalog, creating");
                        report.created += 1;
                    }
                }

                record.stamp_last_update(Utc::now());
                if let Err(e) = self.write(&record).await {
                    error!(service = %record.service_id, "Could not write catalog: {}", e);
                    report.failed += 1;
                }
            }
        }

        for service_id in seen.services.difference(&found.services) {
            warn!(service = %service_id, node = %self.node, "Deleting service");
            match self.bounded(self.backend.delete_service(service_id, &self.node)).await {
                Ok(()) => report.deleted_services += 1,
                Err(e) => {
                    error!(service = %service_id, "Could not delete service: {}", e);
                    report.failed += 1;
                }
            }
        }

        for check_id in seen.checks.difference(&found.checks) {
            warn!(check = %check_id, node = %self.node, "Deleting check");
            match self.bounded(self.backend.delete_check(check_id, &self.node)).await {
                Ok(()) => report.deleted_checks += 1,
                Err(e) => {
                    error!(check = %check_id, "Could not delete check: {}", e);
                    report.failed += 1;
                }
            }
        }

        debug!(?report, "Finished catalog write");
        Ok(report)
    }

    async fn write(&self, record: &ServiceRecord) -> Result<()> {
        self.bounded(self.backend.write_service(record)).await
    }

    async fn bounded<F>(&self, call: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        tokio::time::timeout(self.write_timeout, call)
            .await
            .map_err(|_| Error::Timeout(self.write_timeout))?
    }

    /// Reconcile every filtered snapshot until the input closes
    pub(crate) async fn run(
        self,
        mut input: SnapshotSubscriber<Vec<R>>,
        events: EventSink,
    ) -> Result<()> {
        info!(node = %self.node, policy = %self.policy, "Starting {} catalog writer", R::KIND);

        while let Some(snapshot) = input.next().await {
            let report = self.reconcile(&snapshot).await?;
            events.emit(ControllerEvent::PassCompleted {
                kind: R::KIND,
                report,
            });
        }

        Ok(())
    }
}

/// Which identity of `record` has already been derived this pass
fn duplicate_field(found: &SeenSet, record: &ServiceRecord) -> Option<&'static str> {
    if found.services.contains(&record.service_id) {
        return Some("service ID");
    }
    if !record.check_id.is_empty() && found.checks.contains(&record.check_id) {
        return Some("check ID");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_detection_checks_both_identities() {
        let mut found = SeenSet::default();
        let first = ServiceRecord::new("orders-master", "orders", "10.0.0.1", 5432);
        found.insert_record(&first);

        let same_service = ServiceRecord::new("orders-master", "orders", "10.0.0.2", 5432);
        assert_eq!(duplicate_field(&found, &same_service), Some("service ID"));

        let mut same_check = ServiceRecord::new("orders-replica", "orders", "10.0.0.2", 5432);
        same_check.check_id = first.check_id.clone();
        assert_eq!(duplicate_field(&found, &same_check), Some("check ID"));

        let distinct = ServiceRecord::new("orders-replica", "orders", "10.0.0.2", 5432);
        assert_eq!(duplicate_field(&found, &distinct), None);
    }

    #[test]
    fn report_counts_writes() {
        let report = PassReport {
            created: 2,
            updated: 1,
            unchanged: 4,
            ..Default::default()
        };
        assert_eq!(report.writes(), 3);
    }
}
