//! Resource fetcher
//!
//! Lists the full inventory of one resource kind, page by page, and
//! publishes it as one snapshot. A failed page is retried after a fixed
//! delay; after `max_consecutive_errors` failures in a row the fetcher
//! gives up with [`Error::RetryBudgetExhausted`], which stops the
//! controller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::FetcherConfig;
use crate::error::{Error, Result};
use crate::observable::SnapshotPublisher;
use crate::traits::{Resource, ResourceSource, Tags};

use super::{ControllerEvent, EventSink};

/// Consecutive failure counter shared by page and tag requests
#[derive(Debug)]
struct RetryBudget {
    kind: &'static str,
    max: usize,
    delay: Duration,
    consecutive: usize,
}

impl RetryBudget {
    fn new(kind: &'static str, max: usize, delay: Duration) -> Self {
        Self {
            kind,
            max,
            delay,
            consecutive: 0,
        }
    }

    /// Run `op` until it succeeds or the budget runs out
    async fn run<T, F, Fut>(&mut self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            match op().await {
                Ok(value) => {
                    self.consecutive = 0;
                    return Ok(value);
                }
                Err(e) => {
                    self.consecutive += 1;
                    if self.consecutive >= self.max {
                        return Err(Error::RetryBudgetExhausted {
                            kind: self.kind.to_string(),
                            attempts: self.consecutive,
                            last_error: e.to_string(),
                        });
                    }

                    warn!(
                        attempt = self.consecutive,
                        max = self.max,
                        "Failed to {} for {}: {}; retrying in {:?}",
                        what,
                        self.kind,
                        e,
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

/// Per-resource tag cache with a fixed time-to-live
#[derive(Debug, Default)]
struct TagCache {
    ttl: Duration,
    entries: HashMap<String, (Tags, Instant)>,
}

impl TagCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    fn get(&self, identifier: &str) -> Option<&Tags> {
        self.entries
            .get(identifier)
            .filter(|(_, stored)| stored.elapsed() < self.ttl)
            .map(|(tags, _)| tags)
    }

    fn insert(&mut self, identifier: &str, tags: Tags) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries
            .insert(identifier.to_string(), (tags, Instant::now()));
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, stored)| stored.elapsed() < ttl);
    }
}

/// Fetches complete snapshots of one resource kind
pub struct Fetcher<R: Resource> {
    source: Arc<dyn ResourceSource<Resource = R>>,
    interval: Duration,
    budget: RetryBudget,
    tag_cache: TagCache,
}

impl<R: Resource> Fetcher<R> {
    /// Create a fetcher over a resource source
    pub fn new(source: Arc<dyn ResourceSource<Resource = R>>, config: &FetcherConfig) -> Self {
        Self {
            source,
            interval: config.check_interval(),
            budget: RetryBudget::new(R::KIND, config.max_consecutive_errors, config.retry_delay()),
            tag_cache: TagCache::new(config.tag_cache_ttl()),
        }
    }

    /// List every page of the inventory
    ///
    /// Only a complete listing is returned; a partial one is never exposed.
    pub async fn fetch_all(&mut self) -> Result<Vec<R>> {
        let mut resources = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        self.tag_cache.evict_expired();

        loop {
            let source = Arc::clone(&self.source);
            let page = self
                .budget
                .run("list resources", || source.list_page(token.clone()))
                .await?;
            pages += 1;

            for mut resource in page.resources {
                self.attach_tags(&mut resource).await?;
                resources.push(resource);
            }

            match page.next_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }

        debug!(pages, count = resources.len(), "Listed {} resources", R::KIND);
        Ok(resources)
    }

    async fn attach_tags(&mut self, resource: &mut R) -> Result<()> {
        if let Some(tags) = self.tag_cache.get(resource.identifier()) {
            resource.set_tags(tags.clone());
            return Ok(());
        }

        let source = Arc::clone(&self.source);
        let lookup = resource.clone();
        let tags = self
            .budget
            .run("list tags", || source.list_tags(&lookup))
            .await?;

        if let Some(tags) = tags {
            self.tag_cache.insert(resource.identifier(), tags.clone());
            resource.set_tags(tags);
        }
        Ok(())
    }

    /// Fetch at startup, on every interval tick and on refresh requests
    ///
    /// A refresh request also restarts the interval timer.
    pub(crate) async fn run(
        mut self,
        output: SnapshotPublisher<Vec<R>>,
        refresh: Arc<Notify>,
        events: EventSink,
    ) -> Result<()> {
        info!(interval = ?self.interval, "Starting {} fetcher worker", R::KIND);

        let timer = tokio::time::sleep(self.interval);
        tokio::pin!(timer);

        loop {
            let resources = self.fetch_all().await?;
            events.emit(ControllerEvent::SnapshotFetched {
                kind: R::KIND,
                count: resources.len(),
            });
            output.publish(resources);

            timer.as_mut().reset(Instant::now() + self.interval);
            tokio::select! {
                _ = timer.as_mut() => {
                    debug!("Scheduled {} fetch", R::KIND);
                }
                _ = refresh.notified() => {
                    info!("Refresh requested, fetching {} now", R::KIND);
                }
            }
        }
    }
}
