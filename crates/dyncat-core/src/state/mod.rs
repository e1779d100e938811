//! Shared catalog state
//!
//! Provides the last-observed catalog snapshot that the catalog tracker
//! writes and the reconciler reads.

pub mod catalog;

pub use catalog::{CatalogSnapshot, CatalogState, SeenSet};
