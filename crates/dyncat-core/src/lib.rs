// # dyncat-core
//
// Core library for mirroring cloud resource inventories into a
// service-discovery catalog.
//
// ## Architecture Overview
//
// - **ResourceSource**: Trait for listing one resource kind from a cloud API, page by page
// - **ServiceMapper**: Trait for the per-kind naming policy (resource -> catalog records)
// - **CatalogBackend**: Trait for writing to and long-polling the catalog
// - **Controller**: Wires the fetcher, filter, catalog tracker and writer tasks together
// - **CatalogState**: The lock-guarded, last-observed catalog snapshot shared by the tasks
//
// ## Design Principles
//
// 1. **Desired state is always complete**: every fetch replaces the previous snapshot
// 2. **Deletion is absence-based**: whatever the catalog holds that a pass did not find is removed
// 3. **Latest wins**: stages hand snapshots over single-slot channels, never queues
// 4. **Failures stay in their stage**: a stage logs and skips, or returns a fatal error
// 5. **Library-First**: the daemon is a thin shell around `Controller`

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod observable;
pub mod record;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use backend::MemoryBackend;
pub use config::{
    ControllerConfig, DuplicatePolicy, FetcherConfig, FilterConfig, Filters, WatcherConfig,
    WriterConfig,
};
pub use engine::{Controller, ControllerEvent, PassReport, RefreshHandle};
pub use error::{Error, Result};
pub use record::{CheckStatus, ServiceRecord};
pub use state::CatalogState;
pub use traits::{CatalogBackend, NodeSnapshot, Resource, ResourceSource, ServiceMapper, Tags};
