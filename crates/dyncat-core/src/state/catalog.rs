// # Catalog State
//
// The controller's last-observed view of the catalog node it owns.
//
// ## Ownership
//
// One `CatalogState` is built per controller and handed explicitly to the
// catalog tracker and the reconciler; there is no process-global state, so
// several controllers (and tests) can run side by side.
//
// ## Locking
//
// A single async mutex guards the snapshot. The tracker holds it only to
// swap in a new snapshot. The reconciler holds it for a whole pass, so the
// `seen` set it computes cannot change underneath the diff.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::record::ServiceRecord;

/// Service and check IDs present in the catalog (or derived in a pass)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    /// Service IDs
    pub services: BTreeSet<String>,
    /// Check IDs
    pub checks: BTreeSet<String>,
}

impl SeenSet {
    /// Add the identities of a record
    pub fn insert_record(&mut self, record: &ServiceRecord) {
        self.services.insert(record.service_id.clone());
        if !record.check_id.is_empty() {
            self.checks.insert(record.check_id.clone());
        }
    }
}

/// Catalog contents at a wait index
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    /// Service ID -> record
    pub services: HashMap<String, ServiceRecord>,
    /// Index of the last applied long-poll result
    pub wait_index: u64,
}

impl CatalogSnapshot {
    /// Identities present in the snapshot
    pub fn seen(&self) -> SeenSet {
        let mut seen = SeenSet::default();
        for record in self.services.values() {
            seen.insert_record(record);
        }
        seen
    }

    /// Records carrying the given resource identifier in their meta
    pub fn records_of_resource<'a>(
        &'a self,
        identifier: &'a str,
    ) -> impl Iterator<Item = &'a ServiceRecord> + 'a {
        self.services.values().filter(move |record| {
            record
                .meta
                .get(crate::record::RESOURCE_META_KEY)
                .is_some_and(|value| value == identifier)
        })
    }
}

/// Lock-guarded catalog snapshot shared by the tracker and the reconciler
#[derive(Debug, Clone, Default)]
pub struct CatalogState {
    inner: Arc<Mutex<CatalogSnapshot>>,
}

impl CatalogState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the snapshot
    pub async fn lock(&self) -> MutexGuard<'_, CatalogSnapshot> {
        self.inner.lock().await
    }

    /// Replace the whole snapshot
    pub async fn replace(&self, services: HashMap<String, ServiceRecord>, wait_index: u64) {
        let mut guard = self.inner.lock().await;
        guard.services = services;
        guard.wait_index = wait_index;
    }

    /// Number of services in the snapshot
    pub async fn len(&self) -> usize {
        self.inner.lock().await.services.len()
    }

    /// Check if the snapshot is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.services.is_empty()
    }
}
