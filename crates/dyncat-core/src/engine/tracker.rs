//! Catalog state tracker
//!
//! Keeps [`CatalogState`] in line with the catalog through a long-poll
//! loop. Each poll blocks until the node's wait index moves or the wait
//! ceiling elapses; only a strictly greater index replaces the snapshot.
//! Poll errors are retried forever after a backoff.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::WatcherConfig;
use crate::error::Result;
use crate::state::CatalogState;
use crate::traits::CatalogBackend;

use super::{ControllerEvent, EventSink};

/// Outcome of one long-poll round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The index did not move; nothing applied
    Unchanged,
    /// A newer snapshot replaced the state
    Applied {
        /// New wait index
        index: u64,
        /// Number of services in the snapshot
        services: usize,
    },
    /// The catalog reported an older index; the next poll starts from 0
    IndexReset,
}

/// Long-poll watcher for one catalog node
pub struct CatalogTracker {
    backend: Arc<dyn CatalogBackend>,
    state: CatalogState,
    node: String,
    wait: Duration,
    backoff: Duration,
    wait_index: u64,
}

impl CatalogTracker {
    /// Create a tracker for `node`
    pub fn new(
        backend: Arc<dyn CatalogBackend>,
        state: CatalogState,
        node: impl Into<String>,
        config: &WatcherConfig,
    ) -> Self {
        Self {
            backend,
            state,
            node: node.into(),
            wait: config.wait_time(),
            backoff: config.error_backoff(),
            wait_index: 1,
        }
    }

    /// Index the next poll will wait on
    pub fn wait_index(&self) -> u64 {
        self.wait_index
    }

    /// Issue one long-poll and apply its result
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        let snapshot = self
            .backend
            .watch_node(&self.node, self.wait_index, self.wait)
            .await?;

        if snapshot.index == self.wait_index {
            debug!(index = snapshot.index, "Catalog index unchanged");
            return Ok(PollOutcome::Unchanged);
        }

        if snapshot.index < self.wait_index {
            warn!(
                previous = self.wait_index,
                returned = snapshot.index,
                "Catalog index went backwards, resetting"
            );
            self.wait_index = 0;
            return Ok(PollOutcome::IndexReset);
        }

        let services = snapshot.services.len();
        self.state.replace(snapshot.services, snapshot.index).await;
        self.wait_index = snapshot.index;
        debug!(index = snapshot.index, services, "Applied catalog snapshot");

        Ok(PollOutcome::Applied {
            index: snapshot.index,
            services,
        })
    }

    /// Poll until cancelled; errors are logged and retried after a backoff
    pub(crate) async fn run(mut self, events: EventSink) -> Result<()> {
        info!(
            node = %self.node,
            backend = self.backend.backend_name(),
            "Starting catalog tracker worker"
        );

        loop {
            match self.poll_once().await {
                Ok(PollOutcome::Applied { index, services }) => {
                    events.emit(ControllerEvent::CatalogRefreshed { index, services });
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        node = %self.node,
                        "Failed to read catalog node: {}; retrying in {:?}",
                        e,
                        self.backoff
                    );
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}
