// # Catalog Backend Trait
//
// Defines the interface the controller uses to change and observe the
// service catalog node it owns.
//
// ## Implementations
//
// - Consul: `dyncat-consul` crate
// - In-memory: `dyncat_core::MemoryBackend` (tests, dry runs)

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::record::ServiceRecord;

/// Full contents of a catalog node at a given wait index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSnapshot {
    /// Service ID -> record
    pub services: HashMap<String, ServiceRecord>,
    /// Wait index the snapshot was read at
    pub index: u64,
}

/// Trait for service catalog implementations
///
/// # Thread Safety
///
/// All methods may be called concurrently: the catalog tracker keeps a
/// long-poll open while the reconciler writes.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP calls to the catalog
/// - ✅ Block inside `watch_node` for up to the requested wait
///
/// ## Forbidden Capabilities
/// - ❌ Retry failed writes (the next reconcile pass retries naturally)
/// - ❌ Hold controller state (owned by `CatalogState`)
#[async_trait]
pub trait CatalogBackend: Send + Sync {
    /// Create or replace a service and its health check
    async fn write_service(&self, record: &ServiceRecord) -> Result<(), crate::Error>;

    /// Remove a service from a node
    async fn delete_service(&self, service_id: &str, node: &str) -> Result<(), crate::Error>;

    /// Remove a health check from a node
    async fn delete_check(&self, check_id: &str, node: &str) -> Result<(), crate::Error>;

    /// Long-poll the contents of a node
    ///
    /// # Parameters
    ///
    /// - `node`: Catalog node name
    /// - `wait_index`: Last index the caller has seen
    /// - `wait`: Maximum time to block waiting for the index to move
    ///
    /// # Returns
    ///
    /// The node contents and the current index. When the wait elapses with
    /// no change the returned index equals `wait_index` and the contents
    /// must be ignored.
    async fn watch_node(
        &self,
        node: &str,
        wait_index: u64,
        wait: Duration,
    ) -> Result<NodeSnapshot, crate::Error>;

    /// Backend name for logs
    fn backend_name(&self) -> &'static str {
        "catalog"
    }
}
