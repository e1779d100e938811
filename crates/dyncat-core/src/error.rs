//! Error types for the catalog controller
//!
//! This module defines all error types used throughout the crate.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the catalog controller
#[derive(Error, Debug)]
pub enum Error {
    /// Cloud resource API errors (listing resources or their tags)
    #[error("Resource source error: {0}")]
    Source(String),

    /// Catalog backend errors (register, deregister, watch)
    #[error("Catalog backend error: {0}")]
    Backend(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limiting errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A call did not complete in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The resource is still being created
    #[error("Resource {identifier} is provisioning: {reason}")]
    Provisioning {
        /// Resource identifier
        identifier: String,
        /// What the resource is waiting for
        reason: String,
    },

    /// The resource cannot be turned into catalog records
    /// (no endpoint, no usable name)
    #[error("Incomplete resource {identifier}: {reason}")]
    IncompleteResource {
        /// Resource identifier
        identifier: String,
        /// Why the resource was not derivable
        reason: String,
    },

    /// Two desired records derived the same catalog identity
    #[error("Duplicate {field} '{id}' derived from resource {resource}")]
    DuplicateIdentity {
        /// "service ID" or "check ID"
        field: &'static str,
        /// The conflicting identity
        id: String,
        /// Identifier of the later resource
        resource: String,
    },

    /// The fetcher gave up after too many consecutive failures
    #[error("Could not list {kind} resources after {attempts} consecutive failures: {last_error}")]
    RetryBudgetExhausted {
        /// Resource kind being listed
        kind: String,
        /// Number of consecutive failed attempts
        attempts: usize,
        /// The last error observed
        last_error: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a resource source error
    pub fn source_api(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Create a catalog backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an incomplete resource error
    pub fn incomplete(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IncompleteResource {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// Create an error for a resource that is still being created
    pub fn provisioning(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Provisioning {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// Whether the resource is only waiting to finish provisioning
    pub fn is_provisioning(&self) -> bool {
        matches!(self, Self::Provisioning { .. })
    }

    /// Whether this error must stop the whole process rather than a single unit of work
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::DuplicateIdentity { .. } | Self::RetryBudgetExhausted { .. }
        )
    }
}
