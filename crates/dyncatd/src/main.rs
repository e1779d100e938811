// # dyncatd - Catalog Mirror Daemon
//
// Thin integration layer: reads configuration from the environment, wires
// one controller per resource kind to the shared catalog backend and runs
// them until a shutdown signal arrives. All reconciliation logic lives in
// dyncat-core.
//
// ## Configuration
//
// ### Controllers
// - `DYNCAT_KINDS`: comma-separated kinds (rds, kafka, elasticache) or `all`
// - `DYNCAT_<KIND>_NODE_NAME`: catalog node owned by a kind (default: kind name)
// - `DYNCAT_CHECK_INTERVAL_SECS`: seconds between inventory fetches
// - `DYNCAT_TAG_CACHE_SECS`: how long fetched tags are reused
// - `DYNCAT_PAGE_SIZE`: resources per inventory page (1-1000)
// - `DYNCAT_ON_DUPLICATE`: `ignore-skip-last` or `quit`
//
// ### Filters
// - `DYNCAT_INSTANCE_FILTER`, `DYNCAT_TAG_FILTER`: `key=v1,v2;key2=v3`
// - `DYNCAT_<KIND>_INSTANCE_FILTER`, `DYNCAT_<KIND>_TAG_FILTER`: per-kind override
//
// ### Naming
// - `DYNCAT_SERVICE_PREFIX`, `DYNCAT_SERVICE_SUFFIX`
// - `DYNCAT_MASTER_TAG`, `DYNCAT_REPLICA_TAG`, `DYNCAT_PRIMARY_TAG`, `DYNCAT_CLUSTER_TAG`
//
// ### Inventory
// - `DYNCAT_INVENTORY_DIR`: directory holding `<kind>.json` and `<kind>-tags.json`
//
// ### Catalog
// - `CONSUL_HTTP_ADDR`: agent address (default: http://127.0.0.1:8500)
// - `CONSUL_HTTP_TOKEN`: ACL token
// - `DYNCAT_MODE`: `live` or `dry-run`
//
// ### Logging
// - `DYNCAT_LOG_LEVEL`: trace, debug, info, warn, error
// - `DYNCAT_LOG_FORMAT`: text or json
//
// ## Signals
//
// SIGTERM and SIGINT stop every controller. SIGUSR1 forces an immediate
// fetch on all of them.
//
// ## Example
//
// ```bash
// export DYNCAT_KINDS=rds,elasticache
// export DYNCAT_INVENTORY_DIR=/var/lib/dyncat/inventory
// export DYNCAT_TAG_FILTER=env=prod
// export CONSUL_HTTP_ADDR=consul.internal:8500
//
// dyncatd
// ```

mod config;

use anyhow::{Context, Result};
use config::{Config, Kind, LogFormat};
use dyncat_aws::{CacheCluster, DbInstance, ElastiCacheMapper, KafkaMapper, MskCluster, RdsMapper};
use dyncat_consul::{ConsulBackend, ConsulConfig};
use dyncat_core::{
    CatalogBackend, Controller, ControllerConfig, ControllerEvent, RefreshHandle, Resource,
    ServiceMapper,
};
use dyncat_source_file::JsonFileSource;
use serde::de::DeserializeOwned;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DyncatExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// A controller stopped with an error
    RuntimeError = 2,
}

impl From<DyncatExitCode> for ExitCode {
    fn from(code: DyncatExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return DyncatExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DyncatExitCode::ConfigError.into();
    }

    let builder = tracing_subscriber::fmt().with_max_level(config.log_level);
    let init = match config.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = init {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DyncatExitCode::ConfigError.into();
    }

    info!(?config, "Starting dyncatd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DyncatExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        let daemon = match Daemon::start(&config).await {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return DyncatExitCode::ConfigError;
            }
        };

        match daemon.run().await {
            Ok(()) => DyncatExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                DyncatExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Running controllers and the handles to steer them
struct Daemon {
    cancel: CancellationToken,
    controllers: JoinSet<(Kind, dyncat_core::Result<()>)>,
    refresh: Vec<RefreshHandle>,
}

impl Daemon {
    /// Connect to the catalog and spawn one controller per configured kind
    async fn start(config: &Config) -> Result<Self> {
        let backend = ConsulBackend::new(ConsulConfig {
            address: config.consul_addr.clone(),
            token: config.consul_token.clone(),
            dry_run: config.dry_run,
        })
        .context("Failed to create catalog backend")?;

        let leader = backend
            .check_leader()
            .await
            .context("Catalog is not reachable")?;
        info!(%leader, "Connected to catalog");

        let backend: Arc<dyn CatalogBackend> = Arc::new(backend);
        let mut daemon = Self {
            cancel: CancellationToken::new(),
            controllers: JoinSet::new(),
            refresh: Vec::new(),
        };

        for kind in &config.kinds {
            let kind = *kind;
            let node = config.node_name(kind).to_string();
            let naming = config.naming.clone();
            match kind {
                Kind::Rds => daemon.spawn::<DbInstance>(
                    config,
                    kind,
                    Arc::new(RdsMapper::new(node, naming)),
                    Arc::clone(&backend),
                )?,
                Kind::Kafka => daemon.spawn::<MskCluster>(
                    config,
                    kind,
                    Arc::new(KafkaMapper::new(node, naming)),
                    Arc::clone(&backend),
                )?,
                Kind::ElastiCache => daemon.spawn::<CacheCluster>(
                    config,
                    kind,
                    Arc::new(ElastiCacheMapper::new(node, naming)),
                    Arc::clone(&backend),
                )?,
            }
        }

        Ok(daemon)
    }

    fn spawn<R>(
        &mut self,
        config: &Config,
        kind: Kind,
        mapper: Arc<dyn ServiceMapper<Resource = R>>,
        backend: Arc<dyn CatalogBackend>,
    ) -> Result<()>
    where
        R: Resource + DeserializeOwned,
    {
        let controller_config = config.controller_config(kind);
        let source = inventory_source::<R>(config, &controller_config)?;
        info!(
            %kind,
            node = %controller_config.node_name,
            inventory = %source.inventory_path().display(),
            "Configuring controller"
        );

        let (controller, events) = Controller::new(Arc::new(source), mapper, backend, controller_config)
            .with_context(|| format!("Failed to configure {} controller", kind))?;

        self.refresh.push(controller.refresh_handle());

        let span = info_span!("controller", %kind);
        tokio::spawn(log_events(events).instrument(span.clone()));

        let cancel = self.cancel.clone();
        self.controllers
            .spawn(async move { (kind, controller.run(cancel).await) }.instrument(span));

        Ok(())
    }

    /// Run until a shutdown signal or the first controller failure
    async fn run(mut self) -> Result<()> {
        let mut signals = Signals::new()?;

        let outcome = loop {
            tokio::select! {
                received = signals.next() => match received {
                    Received::Shutdown(name) => {
                        info!("Received shutdown signal: {}", name);
                        break Ok(());
                    }
                    Received::Refresh => {
                        info!(controllers = self.refresh.len(), "Received SIGUSR1, forcing a fetch");
                        for handle in &self.refresh {
                            handle.refresh();
                        }
                    }
                },
                joined = self.controllers.join_next() => match joined {
                    None => {
                        warn!("No controller left running");
                        break Ok(());
                    }
                    Some(Ok((kind, Ok(())))) => {
                        info!(%kind, "Controller stopped");
                    }
                    Some(Ok((kind, Err(e)))) => {
                        break Err(anyhow::Error::new(e).context(format!("{} controller failed", kind)));
                    }
                    Some(Err(e)) => {
                        break Err(anyhow::anyhow!("Controller task panicked: {}", e));
                    }
                },
            }
        };

        info!("Shutting down controllers");
        self.cancel.cancel();
        while let Some(joined) = self.controllers.join_next().await {
            match joined {
                Ok((kind, Err(e))) => warn!(%kind, error = %e, "Controller stopped with error during shutdown"),
                Ok((kind, Ok(()))) => info!(%kind, "Controller stopped"),
                Err(e) => warn!("Controller task panicked during shutdown: {}", e),
            }
        }

        outcome
    }
}

/// File inventory for one kind, paged by the controller's fetcher settings
fn inventory_source<R>(config: &Config, controller: &ControllerConfig) -> Result<JsonFileSource<R>>
where
    R: Resource + DeserializeOwned,
{
    Ok(JsonFileSource::new(&config.inventory_dir, controller.fetcher.page_size)?)
}

/// Log controller events until the controller drops its sender
async fn log_events(mut events: mpsc::Receiver<ControllerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ControllerEvent::SnapshotFetched { kind, count } => {
                info!(kind, count, "Fetched inventory");
            }
            ControllerEvent::SnapshotFiltered { kind, total, kept } => {
                info!(kind, total, kept, "Filtered inventory");
            }
            ControllerEvent::CatalogRefreshed { index, services } => {
                tracing::debug!(index, services, "Catalog snapshot updated");
            }
            ControllerEvent::PassCompleted { kind, report } => {
                info!(
                    kind,
                    created = report.created,
                    updated = report.updated,
                    unchanged = report.unchanged,
                    skipped = report.skipped,
                    duplicates = report.duplicates,
                    deleted_services = report.deleted_services,
                    deleted_checks = report.deleted_checks,
                    failed = report.failed,
                    "Reconcile pass completed"
                );
            }
            ControllerEvent::Stopped { reason } => {
                info!(%reason, "Controller stopped");
            }
        }
    }
}

/// Signal received by the daemon
enum Received {
    Shutdown(&'static str),
    Refresh,
}

/// Process signal streams
#[cfg(unix)]
struct Signals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
    sigusr1: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?,
            sigusr1: signal(SignalKind::user_defined1()).context("Failed to setup SIGUSR1 handler")?,
        })
    }

    async fn next(&mut self) -> Received {
        tokio::select! {
            _ = self.sigterm.recv() => Received::Shutdown("SIGTERM"),
            _ = self.sigint.recv() => Received::Shutdown("SIGINT"),
            _ = self.sigusr1.recv() => Received::Refresh,
        }
    }
}

/// Fallback for non-Unix platforms: CTRL-C only, no refresh signal
#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Received {
        let _ = tokio::signal::ctrl_c().await;
        Received::Shutdown("CTRL-C")
    }
}
