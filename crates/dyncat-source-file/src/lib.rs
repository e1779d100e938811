// # JSON File Resource Source
//
// Serves a resource inventory from JSON documents on disk, page by page,
// the way a cloud "describe" API would.
//
// ## Layout
//
// ```text
// <dir>/<kind>.json        inventory, required
// <dir>/<kind>-tags.json   identifier -> tags, optional
// ```
//
// The inventory is either a JSON array of descriptors or the raw output of
// a describe call (an object holding one array, e.g. `{"DBInstances": [..]}`).
//
// ## Paging
//
// The file is re-read whenever the first page is requested, so every fetch
// pass sees the current contents. Later pages are served from that read
// with an offset continuation token. A missing or malformed file is a page
// error and goes through the fetcher's retry budget.

use async_trait::async_trait;
use dyncat_core::traits::{Resource, ResourcePage, ResourceSource, Tags};
use dyncat_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

/// Inventory read by the last first-page request
struct Loaded<R> {
    resources: Arc<Vec<R>>,
    tags: Option<Arc<HashMap<String, Tags>>>,
}

impl<R> Default for Loaded<R> {
    fn default() -> Self {
        Self {
            resources: Arc::new(Vec::new()),
            tags: None,
        }
    }
}

/// File-backed resource source for one resource kind
pub struct JsonFileSource<R> {
    inventory: PathBuf,
    tags: PathBuf,
    page_size: usize,
    loaded: RwLock<Loaded<R>>,
    _kind: PhantomData<fn() -> R>,
}

impl<R> std::fmt::Debug for JsonFileSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileSource")
            .field("inventory", &self.inventory)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl<R> JsonFileSource<R>
where
    R: Resource + DeserializeOwned,
{
    /// Create a source reading `<dir>/<kind>.json`
    pub fn new(dir: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::config("Inventory page size must be at least 1"));
        }

        let dir = dir.as_ref();
        Ok(Self {
            inventory: dir.join(format!("{}.json", R::KIND)),
            tags: dir.join(format!("{}-tags.json", R::KIND)),
            page_size,
            loaded: RwLock::new(Loaded::default()),
            _kind: PhantomData,
        })
    }

    /// Path of the inventory file
    pub fn inventory_path(&self) -> &Path {
        &self.inventory
    }

    async fn load(&self) -> Result<Loaded<R>> {
        let contents = fs::read_to_string(&self.inventory).await.map_err(|e| {
            Error::source_api(format!(
                "Failed to read inventory {}: {}",
                self.inventory.display(),
                e
            ))
        })?;
        let resources = parse_inventory(&contents).map_err(|e| {
            Error::source_api(format!(
                "Malformed inventory {}: {}",
                self.inventory.display(),
                e
            ))
        })?;

        let tags = match fs::read_to_string(&self.tags).await {
            Ok(contents) => {
                let tags: HashMap<String, Tags> = serde_json::from_str(&contents).map_err(|e| {
                    Error::source_api(format!("Malformed tag file {}: {}", self.tags.display(), e))
                })?;
                Some(Arc::new(tags))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(Error::source_api(format!(
                    "Failed to read tag file {}: {}",
                    self.tags.display(),
                    e
                )));
            }
        };

        tracing::debug!(
            path = %self.inventory.display(),
            resources = resources.len(),
            "Loaded {} inventory",
            R::KIND
        );

        Ok(Loaded {
            resources: Arc::new(resources),
            tags,
        })
    }
}

#[async_trait]
impl<R> ResourceSource for JsonFileSource<R>
where
    R: Resource + DeserializeOwned,
{
    type Resource = R;

    async fn list_page(&self, token: Option<String>) -> Result<ResourcePage<R>> {
        let (resources, offset) = match token {
            None => {
                let loaded = self.load().await?;
                let resources = Arc::clone(&loaded.resources);
                *self.loaded.write().await = loaded;
                (resources, 0)
            }
            Some(token) => {
                let offset = token.parse::<usize>().map_err(|_| {
                    Error::source_api(format!("Invalid continuation token: {}", token))
                })?;
                (Arc::clone(&self.loaded.read().await.resources), offset)
            }
        };

        let end = offset.saturating_add(self.page_size).min(resources.len());
        let page = resources.get(offset..end).unwrap_or_default().to_vec();
        let next_token = (end < resources.len()).then(|| end.to_string());

        Ok(ResourcePage {
            resources: page,
            next_token,
        })
    }

    async fn list_tags(&self, resource: &R) -> Result<Option<Tags>> {
        let loaded = self.loaded.read().await;
        Ok(loaded.tags.as_ref().map(|tags| {
            tags.get(resource.identifier())
                .cloned()
                .unwrap_or_default()
        }))
    }

    fn source_name(&self) -> &'static str {
        "file"
    }
}

/// Accept a bare array or a describe-call envelope holding one array
fn parse_inventory<R: DeserializeOwned>(contents: &str) -> std::result::Result<Vec<R>, String> {
    let value: Value = serde_json::from_str(contents).map_err(|e| e.to_string())?;

    let array = match value {
        Value::Array(_) => value,
        Value::Object(map) => map
            .into_iter()
            .map(|(_, value)| value)
            .find(Value::is_array)
            .ok_or_else(|| "object holds no array of resources".to_string())?,
        _ => return Err("expected an array of resources".to_string()),
    };

    serde_json::from_value(array).map_err(|e| e.to_string())
}
