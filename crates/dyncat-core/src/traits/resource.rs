// # Resource Trait
//
// A cloud resource descriptor of one fixed kind (a database instance, a
// Kafka cluster, a cache cluster).
//
// The engine never looks inside a resource beyond this trait: it needs a
// stable identifier, named attributes for instance filters, and tags for
// tag filters. Everything else is the business of the kind's
// `ServiceMapper`.

use std::collections::HashMap;

/// Resource tags, key -> value
pub type Tags = HashMap<String, String>;

/// How an instance filter value is compared with an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Attribute must equal one of the allowed values
    #[default]
    Exact,
    /// Attribute must start with one of the allowed values
    Prefix,
}

/// A cloud resource descriptor
pub trait Resource: Clone + Send + Sync + 'static {
    /// Short kind name used in logs and spans (e.g. "rds")
    const KIND: &'static str;

    /// Attribute names accepted as instance filter keys
    const FILTER_KEYS: &'static [&'static str];

    /// Stable identifier of the resource within its kind
    fn identifier(&self) -> &str;

    /// Value of a named attribute, `None` when the resource has no value for it
    fn attribute(&self, key: &str) -> Option<&str>;

    /// Comparison used for the instance filter on `key`
    fn match_mode(_key: &str) -> MatchMode {
        MatchMode::Exact
    }

    /// Tags attached to the resource
    fn tags(&self) -> &Tags;

    /// Replace the resource tags with a separately looked-up set
    fn set_tags(&mut self, tags: Tags);
}
