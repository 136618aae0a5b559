//! Known topics and table-name aliases.

use std::collections::{HashMap, HashSet};

/// Topics the hub serves by default.
pub const DEFAULT_TOPICS: &[&str] = &["asset", "incident", "car", "user"];

/// Table names that map onto a differently named default topic.
pub const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("assets", "asset"),
    ("incidents", "incident"),
    ("cars", "car"),
    ("users", "user"),
];

/// Registry of topic names accepted by the decoder.
///
/// Upstream sources usually tag notifications with the table name that
/// changed, which does not always match the topic name clients subscribe
/// to. Aliases translate one into the other before the topic is checked.
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    topics: HashSet<String>,
    aliases: HashMap<String, String>,
}

impl TopicRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the default topics and aliases.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for topic in DEFAULT_TOPICS {
            registry.register(*topic);
        }
        for (table, topic) in DEFAULT_ALIASES {
            registry.alias(*table, *topic);
        }
        registry
    }

    /// Add a topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.register(topic);
        self
    }

    /// Add an alias from an upstream table name to a topic.
    pub fn with_alias(mut self, table: impl Into<String>, topic: impl Into<String>) -> Self {
        self.alias(table, topic);
        self
    }

    /// Register a topic in place.
    pub fn register(&mut self, topic: impl Into<String>) {
        self.topics.insert(topic.into());
    }

    /// Register an alias in place.
    pub fn alias(&mut self, table: impl Into<String>, topic: impl Into<String>) {
        self.aliases.insert(table.into(), topic.into());
    }

    /// Resolve an upstream identifier to a known topic name.
    ///
    /// Returns `None` if neither the identifier nor its alias target is a
    /// registered topic.
    pub fn resolve<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        let candidate = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.topics.get(candidate).map(String::as_str)
    }

    /// Check whether a topic is registered.
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    /// Registered topic names, sorted.
    pub fn topics(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered topics.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Check if no topics are registered.
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
