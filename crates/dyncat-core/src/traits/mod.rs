//! Core traits for the catalog controller
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`Resource`]: One cloud resource descriptor of a fixed kind
//! - [`ResourceSource`]: List resources of one kind from a cloud API
//! - [`ServiceMapper`]: Turn a resource into catalog records (naming policy)
//! - [`CatalogBackend`]: Write to and long-poll the service catalog

pub mod catalog_backend;
pub mod resource;
pub mod resource_source;

pub use catalog_backend::{CatalogBackend, NodeSnapshot};
pub use resource::{MatchMode, Resource, Tags};
pub use resource_source::{ResourcePage, ResourceSource, ServiceMapper};
