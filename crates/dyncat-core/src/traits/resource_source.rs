// # Resource Source Trait
//
// Defines the interface for listing one resource kind from a cloud API.
//
// ## Implementations
//
// - JSON inventory files: `dyncat-source-file` crate
// - Future: direct cloud SDK clients
//
// ## Usage
//
// ```rust,ignore
// use dyncat_core::ResourceSource;
//
// let mut token = None;
// loop {
//     let page = source.list_page(token).await?;
//     handle(page.resources);
//     match page.next_token {
//         Some(next) => token = Some(next),
//         None => break,
//     }
// }
// ```

use async_trait::async_trait;

use crate::record::ServiceRecord;
use crate::traits::resource::{Resource, Tags};

/// One page of a resource listing
#[derive(Debug, Clone)]
pub struct ResourcePage<R> {
    /// Resources on this page
    pub resources: Vec<R>,
    /// Continuation token, `None` on the last page
    pub next_token: Option<String>,
}

impl<R> ResourcePage<R> {
    /// A final page
    pub fn last(resources: Vec<R>) -> Self {
        Self {
            resources,
            next_token: None,
        }
    }
}

/// Trait for cloud resource API implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Trust Level: Untrusted
///
/// Sources are external integrations with strict limitations:
///
/// ## Allowed Capabilities
/// - ✅ Call their cloud API, one request per invocation
/// - ✅ Parse provider-specific responses into descriptors
/// - ✅ Return success or failure (the fetcher handles retry)
///
/// ## Forbidden Capabilities
/// - ❌ Retry or back off on their own (owned by the fetcher)
/// - ❌ Filter resources (owned by the filter stage)
/// - ❌ Spawn tasks (violates shutdown determinism)
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Descriptor type produced by this source
    type Resource: Resource;

    /// Fetch one page of the inventory
    ///
    /// # Parameters
    ///
    /// - `token`: Continuation token from the previous page, `None` for the first page
    ///
    /// # Returns
    ///
    /// - `Ok(ResourcePage)`: The page and the token of the next one
    /// - `Err(Error)`: The page could not be fetched; the same page will be requested again
    async fn list_page(
        &self,
        token: Option<String>,
    ) -> Result<ResourcePage<Self::Resource>, crate::Error>;

    /// Look up the tags of a resource
    ///
    /// Returns `Ok(None)` when the descriptor already carries its tags.
    async fn list_tags(&self, _resource: &Self::Resource) -> Result<Option<Tags>, crate::Error> {
        Ok(None)
    }

    /// Human-readable source name for logs
    fn source_name(&self) -> &'static str {
        "unknown"
    }
}

/// Per-kind naming policy: resource -> catalog records
///
/// A mapper is a pure function. One resource may derive several records
/// (one per broker, cache node or replica role). An `Err` means the
/// resource is not derivable this pass, typically because it is still
/// provisioning; the reconciler skips it and keeps its catalog entries.
pub trait ServiceMapper: Send + Sync {
    /// Descriptor type accepted by this mapper
    type Resource: Resource;

    /// Derive the desired catalog records for one resource
    fn map(&self, resource: &Self::Resource) -> Result<Vec<ServiceRecord>, crate::Error>;
}
