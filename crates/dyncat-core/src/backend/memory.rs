// # Memory Catalog Backend
//
// In-memory implementation of CatalogBackend.
//
// ## Purpose
//
// Behaves like a single-datacenter catalog: every write or delete bumps a
// global index and wakes long-polls waiting on an older index. Nothing
// persists across restarts.
//
// ## When to Use
//
// - Testing environments
// - Running a controller without a catalog to see what it would register

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

use crate::record::ServiceRecord;
use crate::traits::catalog_backend::{CatalogBackend, NodeSnapshot};
use crate::Error;

#[derive(Debug)]
struct Catalog {
    nodes: HashMap<String, HashMap<String, ServiceRecord>>,
    index: u64,
}

/// In-memory catalog backend
///
/// # Example
///
/// ```rust,no_run
/// use dyncat_core::{CatalogBackend, MemoryBackend, ServiceRecord};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = MemoryBackend::new();
///
///     let mut record = ServiceRecord::new("db-1", "orders", "10.0.0.1", 5432);
///     record.check_node = "rds".into();
///     backend.write_service(&record).await?;
///
///     let snapshot = backend.watch_node("rds", 0, Duration::from_secs(1)).await?;
///     assert!(snapshot.services.contains_key("db-1"));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Catalog>>,
    changed: Arc<Notify>,
}

impl MemoryBackend {
    /// Create an empty catalog at index 1
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Catalog {
                nodes: HashMap::new(),
                index: 1,
            })),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Services currently registered on a node
    pub async fn services(&self, node: &str) -> HashMap<String, ServiceRecord> {
        let guard = self.inner.read().await;
        guard.nodes.get(node).cloned().unwrap_or_default()
    }

    /// Current catalog index
    pub async fn index(&self) -> u64 {
        self.inner.read().await.index
    }

    async fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut HashMap<String, HashMap<String, ServiceRecord>>),
    {
        {
            let mut guard = self.inner.write().await;
            f(&mut guard.nodes);
            guard.index += 1;
        }
        self.changed.notify_waiters();
    }

    async fn snapshot(&self, node: &str) -> NodeSnapshot {
        let guard = self.inner.read().await;
        NodeSnapshot {
            services: guard.nodes.get(node).cloned().unwrap_or_default(),
            index: guard.index,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogBackend for MemoryBackend {
    async fn write_service(&self, record: &ServiceRecord) -> Result<(), Error> {
        if record.service_id.is_empty() {
            return Err(Error::backend("Service ID cannot be empty"));
        }

        let record = record.clone();
        self.mutate(move |nodes| {
            nodes
                .entry(record.check_node.clone())
                .or_default()
                .insert(record.service_id.clone(), record);
        })
        .await;
        Ok(())
    }

    async fn delete_service(&self, service_id: &str, node: &str) -> Result<(), Error> {
        self.mutate(|nodes| {
            if let Some(services) = nodes.get_mut(node) {
                services.remove(service_id);
            }
        })
        .await;
        Ok(())
    }

    async fn delete_check(&self, check_id: &str, node: &str) -> Result<(), Error> {
        self.mutate(|nodes| {
            if let Some(services) = nodes.get_mut(node) {
                for record in services.values_mut().filter(|r| r.check_id == check_id) {
                    record.check_id.clear();
                }
            }
        })
        .await;
        Ok(())
    }

    async fn watch_node(
        &self,
        node: &str,
        wait_index: u64,
        wait: Duration,
    ) -> Result<NodeSnapshot, Error> {
        let notified = self.changed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let current = self.snapshot(node).await;
        if current.index != wait_index {
            return Ok(current);
        }

        // Times out with an unchanged index, like a catalog long-poll
        let _ = tokio::time::timeout(wait, notified).await;
        Ok(self.snapshot(node).await)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
