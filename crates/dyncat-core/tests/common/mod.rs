//! Test doubles and common utilities for controller contract tests
//!
//! This module provides minimal test doubles that verify architectural
//! constraints without talking to a real cloud API or catalog.

#![allow(dead_code)]

use dyncat_core::engine::PassReport;
use dyncat_core::error::{Error, Result};
use dyncat_core::traits::{
    CatalogBackend, MatchMode, NodeSnapshot, Resource, ResourcePage, ResourceSource,
    ServiceMapper, Tags,
};
use dyncat_core::{CatalogState, CheckStatus, ControllerConfig, ControllerEvent, MemoryBackend, ServiceRecord};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const NODE: &str = "rds";

/// A database-like resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDb {
    pub id: String,
    /// Overrides the derived service ID (to provoke duplicates)
    pub service: Option<String>,
    pub address: Option<String>,
    pub port: u16,
    pub status: String,
    pub engine: String,
    pub tags: Tags,
}

impl Resource for TestDb {
    const KIND: &'static str = "testdb";
    const FILTER_KEYS: &'static [&'static str] = &["DBInstanceIdentifier", "DBInstanceStatus", "Engine"];

    fn identifier(&self) -> &str {
        &self.id
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "DBInstanceIdentifier" => Some(&self.id),
            "DBInstanceStatus" => Some(&self.status),
            "Engine" => Some(&self.engine),
            _ => None,
        }
    }

    fn match_mode(_key: &str) -> MatchMode {
        MatchMode::Exact
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn set_tags(&mut self, tags: Tags) {
        self.tags = tags;
    }
}

/// An available database with an endpoint
pub fn db(id: &str, address: &str, port: u16) -> TestDb {
    TestDb {
        id: id.to_string(),
        service: None,
        address: Some(address.to_string()),
        port,
        status: "available".to_string(),
        engine: "postgres".to_string(),
        tags: Tags::new(),
    }
}

/// A database that has no endpoint yet
pub fn provisioning_db(id: &str) -> TestDb {
    TestDb {
        address: None,
        status: "creating".to_string(),
        ..db(id, "", 0)
    }
}

/// A database that has lost its endpoint outside of creation
pub fn endpointless_db(id: &str) -> TestDb {
    TestDb {
        address: None,
        status: "modifying".to_string(),
        ..db(id, "", 0)
    }
}

/// Maps one TestDb to one record on `NODE`
pub struct TestDbMapper;

impl ServiceMapper for TestDbMapper {
    type Resource = TestDb;

    fn map(&self, resource: &TestDb) -> Result<Vec<ServiceRecord>> {
        if resource.status == "creating" {
            return Err(Error::provisioning(&resource.id, "being created"));
        }

        let address = resource
            .address
            .as_deref()
            .ok_or_else(|| Error::incomplete(&resource.id, "no endpoint yet"))?;

        let id = resource.service.clone().unwrap_or_else(|| resource.id.clone());
        let mut record = ServiceRecord::new(id, "orders", address, resource.port);
        record.tags = vec!["master".to_string(), "replica".to_string()];
        record.meta.insert("Engine".to_string(), resource.engine.clone());
        record.check_node = NODE.to_string();
        record.check_status = match resource.status.as_str() {
            "available" => CheckStatus::Passing,
            "upgrading" => CheckStatus::Warning,
            _ => CheckStatus::Critical,
        };
        record.check_notes = format!("Status: {}", resource.status);
        record.check_output = format!("Addr: {}", address);

        Ok(vec![record])
    }
}

/// A resource source serving an inventory in pages, with injectable failures
#[derive(Clone)]
pub struct ScriptedSource {
    inventory: Arc<Mutex<Vec<TestDb>>>,
    page_size: usize,
    fail_next: Arc<AtomicUsize>,
    always_fail: Arc<AtomicBool>,
    list_calls: Arc<AtomicUsize>,
    list_call_times: Arc<Mutex<Vec<Instant>>>,
    tags: Arc<Mutex<HashMap<String, Tags>>>,
    tag_calls: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(inventory: Vec<TestDb>) -> Self {
        Self::with_page_size(inventory, 100)
    }

    pub fn with_page_size(inventory: Vec<TestDb>, page_size: usize) -> Self {
        Self {
            inventory: Arc::new(Mutex::new(inventory)),
            page_size,
            fail_next: Arc::new(AtomicUsize::new(0)),
            always_fail: Arc::new(AtomicBool::new(false)),
            list_calls: Arc::new(AtomicUsize::new(0)),
            list_call_times: Arc::new(Mutex::new(Vec::new())),
            tags: Arc::new(Mutex::new(HashMap::new())),
            tag_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the inventory served from the next fetch on
    pub fn set_inventory(&self, inventory: Vec<TestDb>) {
        *self.inventory.lock().unwrap() = inventory;
    }

    /// Fail the next `n` page requests
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every page request
    pub fn always_fail(&self) {
        self.always_fail.store(true, Ordering::SeqCst);
    }

    /// Serve tags through a separate lookup
    pub fn set_tags(&self, id: &str, tags: Tags) {
        self.tags.lock().unwrap().insert(id.to_string(), tags);
    }

    /// Get the number of times list_page() was called
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Times at which a first page was requested
    pub fn fetch_times(&self) -> Vec<Instant> {
        self.list_call_times.lock().unwrap().clone()
    }

    /// Get the number of times list_tags() was called
    pub fn tag_calls(&self) -> usize {
        self.tag_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ResourceSource for ScriptedSource {
    type Resource = TestDb;

    async fn list_page(&self, token: Option<String>) -> Result<ResourcePage<TestDb>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if token.is_none() {
            self.list_call_times.lock().unwrap().push(Instant::now());
        }

        if self.always_fail.load(Ordering::SeqCst) {
            return Err(Error::auth("invalid credentials"));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::rate_limited("throttled"));
        }

        let offset: usize = match token {
            Some(t) => t.parse().map_err(|_| Error::source_api("bad token"))?,
            None => 0,
        };
        let inventory = self.inventory.lock().unwrap();
        let end = (offset + self.page_size).min(inventory.len());
        let resources = inventory[offset.min(end)..end].to_vec();
        let next_token = (end < inventory.len()).then(|| end.to_string());

        Ok(ResourcePage {
            resources,
            next_token,
        })
    }

    async fn list_tags(&self, resource: &TestDb) -> Result<Option<Tags>> {
        let tags = self.tags.lock().unwrap().get(&resource.id).cloned();
        if tags.is_some() {
            self.tag_calls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(tags)
    }
}

/// A catalog backend over `MemoryBackend` that records every call
#[derive(Clone, Default)]
pub struct RecordingBackend {
    inner: MemoryBackend,
    writes: Arc<Mutex<Vec<ServiceRecord>>>,
    deleted_services: Arc<Mutex<Vec<String>>>,
    deleted_checks: Arc<Mutex<Vec<String>>>,
    failing_watches: Arc<AtomicUsize>,
    watch_calls: Arc<AtomicUsize>,
    hang_writes: Arc<AtomicBool>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records passed to write_service(), in call order
    pub fn writes(&self) -> Vec<ServiceRecord> {
        self.writes.lock().unwrap().clone()
    }

    /// Service IDs written, in call order
    pub fn written_ids(&self) -> Vec<String> {
        self.writes().into_iter().map(|r| r.service_id).collect()
    }

    pub fn deleted_services(&self) -> Vec<String> {
        self.deleted_services.lock().unwrap().clone()
    }

    pub fn deleted_checks(&self) -> Vec<String> {
        self.deleted_checks.lock().unwrap().clone()
    }

    /// Forget recorded calls (catalog contents stay)
    pub fn reset_calls(&self) {
        self.writes.lock().unwrap().clear();
        self.deleted_services.lock().unwrap().clear();
        self.deleted_checks.lock().unwrap().clear();
    }

    /// Fail the next `n` watch requests
    pub fn fail_watches(&self, n: usize) {
        self.failing_watches.store(n, Ordering::SeqCst);
    }

    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    /// Make write_service() never complete
    pub fn hang_writes(&self) {
        self.hang_writes.store(true, Ordering::SeqCst);
    }

    /// Services currently in the catalog node
    pub async fn services(&self) -> HashMap<String, ServiceRecord> {
        self.inner.services(NODE).await
    }

    /// Copy the catalog node into `state`, as the tracker would
    pub async fn sync_into(&self, state: &CatalogState) {
        let index = self.inner.index().await;
        state.replace(self.services().await, index).await;
    }

    /// Seed the catalog without recording a write
    pub async fn seed(&self, record: &ServiceRecord) {
        self.inner.write_service(record).await.unwrap();
    }
}

#[async_trait::async_trait]
impl CatalogBackend for RecordingBackend {
    async fn write_service(&self, record: &ServiceRecord) -> Result<()> {
        self.writes.lock().unwrap().push(record.clone());
        if self.hang_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.write_service(record).await
    }

    async fn delete_service(&self, service_id: &str, node: &str) -> Result<()> {
        self.deleted_services
            .lock()
            .unwrap()
            .push(service_id.to_string());
        self.inner.delete_service(service_id, node).await
    }

    async fn delete_check(&self, check_id: &str, node: &str) -> Result<()> {
        self.deleted_checks.lock().unwrap().push(check_id.to_string());
        self.inner.delete_check(check_id, node).await
    }

    async fn watch_node(&self, node: &str, wait_index: u64, wait: Duration) -> Result<NodeSnapshot> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_watches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::backend("connection refused"));
        }
        self.inner.watch_node(node, wait_index, wait).await
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

/// A catalog whose long-poll answers come from a script
#[derive(Clone, Default)]
pub struct ScriptedCatalog {
    responses: Arc<Mutex<VecDeque<Result<NodeSnapshot>>>>,
    requested_indexes: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<NodeSnapshot>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Wait indexes passed to watch_node(), in call order
    pub fn requested_indexes(&self) -> Vec<u64> {
        self.requested_indexes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CatalogBackend for ScriptedCatalog {
    async fn write_service(&self, _record: &ServiceRecord) -> Result<()> {
        Ok(())
    }

    async fn delete_service(&self, _service_id: &str, _node: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_check(&self, _check_id: &str, _node: &str) -> Result<()> {
        Ok(())
    }

    async fn watch_node(&self, _node: &str, wait_index: u64, _wait: Duration) -> Result<NodeSnapshot> {
        self.requested_indexes.lock().unwrap().push(wait_index);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None => std::future::pending().await,
        }
    }
}

/// A node snapshot holding the given service IDs
pub fn node_snapshot(index: u64, ids: &[&str]) -> NodeSnapshot {
    let services = ids
        .iter()
        .map(|id| {
            let mut record = ServiceRecord::new(*id, "orders", "10.0.0.1", 5432);
            record.check_node = NODE.to_string();
            (id.to_string(), record)
        })
        .collect();
    NodeSnapshot { services, index }
}

/// Minimal controller configuration for tests
pub fn minimal_config() -> ControllerConfig {
    ControllerConfig::new(NODE)
}

/// Wait for the next event matching `pick`
pub async fn next_event<T>(
    rx: &mut mpsc::Receiver<ControllerEvent>,
    mut pick: impl FnMut(ControllerEvent) -> Option<T>,
) -> T {
    let wait = async {
        while let Some(event) = rx.recv().await {
            if let Some(value) = pick(event) {
                return value;
            }
        }
        panic!("event channel closed");
    };
    tokio::time::timeout(Duration::from_secs(3600), wait)
        .await
        .expect("event arrives in time")
}

/// Wait for the next completed reconcile pass
pub async fn next_pass(rx: &mut mpsc::Receiver<ControllerEvent>) -> PassReport {
    next_event(rx, |event| match event {
        ControllerEvent::PassCompleted { report, .. } => Some(report),
        _ => None,
    })
    .await
}
