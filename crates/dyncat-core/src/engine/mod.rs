//! Catalog controller
//!
//! The Controller wires four long-lived workers for one resource kind:
//!
//! ```text
//! ┌──────────────┐  snapshot  ┌──────────┐  snapshot  ┌──────────────┐
//! │   Fetcher    │───────────▶│  Filter  │───────────▶│  Reconciler  │
//! │ (cloud API)  │            └──────────┘            │   (writer)   │
//! └──────────────┘                                    └──────────────┘
//!        ▲                                              │   ▲
//!   RefreshHandle                           write/delete│   │ lock
//!                                                       ▼   │
//! ┌────────────────┐   long-poll    ┌───────────────┐  ┌──────────────┐
//! │ CatalogTracker │◀──────────────▶│ CatalogBackend│  │ CatalogState │
//! └────────────────┘                └───────────────┘  └──────────────┘
//!          │                                                ▲
//!          └───────────────── replace snapshot ─────────────┘
//! ```
//!
//! ## Event Flow
//!
//! 1. The fetcher lists every page and publishes the full snapshot
//! 2. The filter publishes the reduced snapshot
//! 3. The reconciler locks the catalog state and converges the node
//! 4. The tracker picks the writes up on its next long-poll
//!
//! Snapshots travel over single-slot channels: a worker that falls behind
//! only ever sees the latest snapshot.
//!
//! ## Shutdown
//!
//! Every worker observes the same cancellation token. The first worker to
//! fail cancels its siblings and `run` returns that error.

pub mod fetcher;
pub mod filter;
pub mod reconciler;
pub mod tracker;

pub use fetcher::Fetcher;
pub use filter::ResourceFilter;
pub use reconciler::{PassReport, Reconciler};
pub use tracker::{CatalogTracker, PollOutcome};

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::observable::snapshot_channel;
use crate::state::CatalogState;
use crate::traits::{CatalogBackend, Resource, ResourceSource, ServiceMapper};

/// Events emitted by the Controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A complete inventory was listed
    SnapshotFetched {
        kind: &'static str,
        count: usize,
    },

    /// A snapshot went through the filters
    SnapshotFiltered {
        kind: &'static str,
        total: usize,
        kept: usize,
    },

    /// The tracker applied a newer catalog snapshot
    CatalogRefreshed {
        index: u64,
        services: usize,
    },

    /// A reconcile pass finished
    PassCompleted {
        kind: &'static str,
        report: PassReport,
    },

    /// Controller stopped
    Stopped {
        reason: String,
    },
}

/// Non-blocking sender for controller events
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<ControllerEvent>,
}

impl EventSink {
    fn new(capacity: usize) -> (Self, mpsc::Receiver<ControllerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Send an event, dropping it if the channel is full
    pub(crate) fn emit(&self, event: ControllerEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(event) {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Handle that makes the fetcher list resources immediately
///
/// Triggering also restarts the interval timer. Requests made while a
/// fetch is running collapse into one follow-up fetch.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    notify: Arc<Notify>,
}

impl RefreshHandle {
    /// Request an immediate fetch
    pub fn refresh(&self) {
        self.notify.notify_one();
    }
}

/// Reconciliation controller for one resource kind
///
/// ## Lifecycle
///
/// 1. Create with [`Controller::new()`]
/// 2. Start with [`Controller::run()`]
/// 3. Runs until the token is cancelled or a worker fails fatally
pub struct Controller<R: Resource> {
    fetcher: Fetcher<R>,
    filter: ResourceFilter<R>,
    tracker: CatalogTracker,
    reconciler: Reconciler<R>,
    state: CatalogState,
    refresh: Arc<Notify>,
    events: EventSink,
}

impl<R: Resource> Controller<R> {
    /// Create a new controller
    ///
    /// # Parameters
    ///
    /// - `source`: Cloud resource API for this kind
    /// - `mapper`: Naming policy for this kind
    /// - `backend`: Service catalog
    /// - `config`: Controller configuration
    ///
    /// # Returns
    ///
    /// A tuple of (controller, event_receiver). Fails with a configuration
    /// error on invalid settings or unknown filter keys.
    pub fn new(
        source: Arc<dyn ResourceSource<Resource = R>>,
        mapper: Arc<dyn ServiceMapper<Resource = R>>,
        backend: Arc<dyn CatalogBackend>,
        config: ControllerConfig,
    ) -> Result<(Self, mpsc::Receiver<ControllerEvent>)> {
        config.validate()?;

        let filter = ResourceFilter::new(&config.filters)?;
        let (events, rx) = EventSink::new(config.writer.event_channel_capacity);
        let state = CatalogState::new();

        let controller = Self {
            fetcher: Fetcher::new(source, &config.fetcher),
            filter,
            tracker: CatalogTracker::new(
                Arc::clone(&backend),
                state.clone(),
                config.node_name.clone(),
                &config.watcher,
            ),
            reconciler: Reconciler::new(
                mapper,
                backend,
                state.clone(),
                config.node_name,
                &config.writer,
            ),
            state,
            refresh: Arc::new(Notify::new()),
            events,
        };

        Ok((controller, rx))
    }

    /// Handle for triggering immediate fetches
    pub fn refresh_handle(&self) -> RefreshHandle {
        RefreshHandle {
            notify: Arc::clone(&self.refresh),
        }
    }

    /// The catalog snapshot shared by the tracker and the reconciler
    pub fn state(&self) -> CatalogState {
        self.state.clone()
    }

    /// Run all workers until cancellation or the first fatal error
    ///
    /// # Returns
    ///
    /// - `Ok(())`: `cancel` fired
    /// - `Err(Error)`: A worker failed; the other workers were stopped
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let kind = R::KIND;
        let local = cancel.child_token();
        let mut tasks = JoinSet::new();

        let (fetched_tx, fetched_rx) = snapshot_channel();
        let (filtered_tx, filtered_rx) = snapshot_channel();

        info!(kind, "Starting controller");

        spawn_worker(
            &mut tasks,
            "fetcher",
            kind,
            local.clone(),
            self.fetcher
                .run(fetched_tx, self.refresh, self.events.clone()),
        );
        spawn_worker(
            &mut tasks,
            "filter",
            kind,
            local.clone(),
            self.filter.run(fetched_rx, filtered_tx, self.events.clone()),
        );
        spawn_worker(
            &mut tasks,
            "catalog-tracker",
            kind,
            local.clone(),
            self.tracker.run(self.events.clone()),
        );
        spawn_worker(
            &mut tasks,
            "writer",
            kind,
            local.clone(),
            self.reconciler.run(filtered_rx, self.events.clone()),
        );

        let mut outcome = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => Error::Other(format!("Worker task failed: {}", e)),
            };

            error!(kind, "Controller stopping: {}", failure);
            local.cancel();
            tasks.shutdown().await;
            outcome = Err(failure);
            break;
        }

        let reason = match &outcome {
            Ok(()) => "Shutdown signal".to_string(),
            Err(e) => e.to_string(),
        };
        info!(kind, "Controller stopped");
        self.events.emit(ControllerEvent::Stopped { reason });

        outcome
    }
}

/// Spawn a worker inside its span; cancellation ends it with `Ok`
fn spawn_worker<F>(
    tasks: &mut JoinSet<Result<()>>,
    worker: &'static str,
    kind: &'static str,
    cancel: CancellationToken,
    work: F,
) where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let span = info_span!("worker", worker, kind);
    tasks.spawn(
        async move {
            tokio::select! {
                result = work => result,
                _ = cancel.cancelled() => {
                    debug!("Worker cancelled");
                    Ok(())
                }
            }
        }
        .instrument(span),
    );
}
