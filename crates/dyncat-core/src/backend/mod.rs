//! Catalog backend implementations shipped with the core
//!
//! Provides an in-memory catalog for tests and offline runs.

pub mod memory;

pub use memory::MemoryBackend;
