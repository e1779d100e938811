//! Snapshot filter
//!
//! Reduces a fetched snapshot to the resources matching the user's
//! instance-attribute and tag filters. Filter keys are checked once at
//! construction; an unknown key is a configuration error.

use std::marker::PhantomData;
use tracing::{debug, info};

use crate::config::FilterConfig;
use crate::error::{Error, Result};
use crate::observable::{SnapshotPublisher, SnapshotSubscriber};
use crate::traits::{MatchMode, Resource};

use super::{ControllerEvent, EventSink};

/// Compiled instance and tag filters for one resource kind
#[derive(Debug, Clone)]
pub struct ResourceFilter<R> {
    instance: Vec<(String, Vec<String>)>,
    tags: Vec<(String, String)>,
    _resource: PhantomData<fn() -> R>,
}

impl<R: Resource> ResourceFilter<R> {
    /// Build a filter, rejecting instance keys the resource kind does not know
    pub fn new(config: &FilterConfig) -> Result<Self> {
        let mut instance = Vec::with_capacity(config.instance.len());
        for (key, allowed) in &config.instance {
            if !R::FILTER_KEYS.contains(&key.as_str()) {
                return Err(Error::config(format!(
                    "Unknown {} instance filter key '{}' (known keys: {})",
                    R::KIND,
                    key,
                    R::FILTER_KEYS.join(", ")
                )));
            }
            let values = allowed.split(',').map(|v| v.trim().to_string()).collect();
            instance.push((key.clone(), values));
        }

        let tags = config
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            instance,
            tags,
            _resource: PhantomData,
        })
    }

    /// Whether no filter is configured
    pub fn is_empty(&self) -> bool {
        self.instance.is_empty() && self.tags.is_empty()
    }

    /// Whether a resource passes every filter
    pub fn matches(&self, resource: &R) -> bool {
        self.matches_instance(resource) && self.matches_tags(resource)
    }

    /// Keep only the matching resources
    pub fn apply(&self, resources: &[R]) -> Vec<R> {
        resources
            .iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect()
    }

    fn matches_instance(&self, resource: &R) -> bool {
        self.instance.iter().all(|(key, allowed)| {
            let value = resource.attribute(key).unwrap_or("");
            match R::match_mode(key) {
                MatchMode::Exact => allowed.iter().any(|v| v == value),
                MatchMode::Prefix => allowed.iter().any(|v| value.starts_with(v.as_str())),
            }
        })
    }

    fn matches_tags(&self, resource: &R) -> bool {
        let tags = resource.tags();
        self.tags
            .iter()
            .all(|(key, expected)| tags.get(key).is_some_and(|v| v == expected))
    }

    /// Filter every published snapshot until the input closes
    pub(crate) async fn run(
        self,
        mut input: SnapshotSubscriber<Vec<R>>,
        output: SnapshotPublisher<Vec<R>>,
        events: EventSink,
    ) -> Result<()> {
        info!("Starting {} filter worker", R::KIND);

        while let Some(snapshot) = input.next().await {
            let filtered = if self.is_empty() {
                snapshot.as_ref().clone()
            } else {
                self.apply(&snapshot)
            };
            debug!(
                total = snapshot.len(),
                kept = filtered.len(),
                "Filtered {} resources",
                R::KIND
            );

            events.emit(ControllerEvent::SnapshotFiltered {
                kind: R::KIND,
                total: snapshot.len(),
                kept: filtered.len(),
            });
            output.publish(filtered);
        }

        Ok(())
    }
}
