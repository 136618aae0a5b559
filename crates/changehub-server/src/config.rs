//! Server configuration.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use changehub_core::config::DEFAULT_QUEUE_CAPACITY;
use changehub_core::{HubConfig, OverflowPolicy};
use changehub_proto::topic::{DEFAULT_ALIASES, DEFAULT_TOPICS};
use changehub_proto::TopicRegistry;

use crate::backoff::{
    Backoff, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_JITTER, DEFAULT_BACKOFF_MAX_MS,
};
use crate::error::Error;
use crate::listener::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::source::{validate_identifier, PgSourceConfig};

/// Default upstream database URL.
pub const DEFAULT_DATABASE_URL: &str = "postgres://postgres@localhost:5432/postgres";

/// Default LISTEN channel.
pub const DEFAULT_CHANNEL: &str = "events";

/// changehub server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upstream database URL.
    pub database_url: String,

    /// Channel to LISTEN on.
    pub channel: String,

    /// Topics accepted from upstream.
    pub topics: Vec<String>,

    /// Table name to topic aliases.
    pub aliases: Vec<(String, String)>,

    /// Per-subscription queue capacity.
    pub queue_capacity: usize,

    /// Behavior when a subscription queue is full.
    pub overflow: OverflowPolicy,

    /// Reconnect backoff policy.
    pub backoff: Backoff,

    /// Timeout for connecting to and unregistering from upstream.
    pub connect_timeout: Duration,

    /// Tables to install notify triggers on.
    pub trigger_tables: Vec<String>,

    /// Topics to log in-process.
    pub taps: Vec<String>,
}

impl ServerConfig {
    /// Create a configuration for the given database URL with defaults.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            channel: DEFAULT_CHANNEL.to_string(),
            topics: DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect(),
            aliases: DEFAULT_ALIASES
                .iter()
                .map(|(table, topic)| (table.to_string(), topic.to_string()))
                .collect(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::DropOldest,
            backoff: Backoff::default(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            trigger_tables: Vec::new(),
            taps: Vec::new(),
        }
    }

    /// Set the LISTEN channel.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Replace the accepted topics.
    pub fn with_topics<I, T>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Add a table alias.
    pub fn with_alias(mut self, table: impl Into<String>, topic: impl Into<String>) -> Self {
        self.aliases.push((table.into(), topic.into()));
        self
    }

    /// Set the per-subscription queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the overflow policy.
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Set the reconnect backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Install a notify trigger on a table at connect time.
    pub fn with_trigger_table(mut self, table: impl Into<String>) -> Self {
        self.trigger_tables.push(table.into());
        self
    }

    /// Log events of a topic in-process.
    pub fn with_tap(mut self, topic: impl Into<String>) -> Self {
        self.taps.push(topic.into());
        self
    }

    /// Check identifiers and topic references.
    pub fn validate(&self) -> Result<(), Error> {
        validate_identifier(&self.channel)?;
        for table in &self.trigger_tables {
            validate_identifier(table)?;
        }
        if self.topics.is_empty() {
            return Err(Error::Config("at least one topic is required".to_string()));
        }
        for (table, topic) in &self.aliases {
            if !self.topics.contains(topic) {
                return Err(Error::Config(format!(
                    "alias '{}' points at unknown topic '{}'",
                    table, topic
                )));
            }
        }
        for topic in &self.taps {
            if !self.topics.contains(topic) {
                return Err(Error::Config(format!("tap on unknown topic '{}'", topic)));
            }
        }
        Ok(())
    }

    /// Build the decoder's topic registry.
    pub fn topic_registry(&self) -> TopicRegistry {
        let mut registry = TopicRegistry::new();
        for topic in &self.topics {
            registry.register(topic.clone());
        }
        for (table, topic) in &self.aliases {
            registry.alias(table.clone(), topic.clone());
        }
        registry
    }

    /// Build the hub configuration.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig::new()
            .with_queue_capacity(self.queue_capacity)
            .with_overflow(self.overflow)
    }

    /// Build the Postgres source configuration.
    pub fn pg_source_config(&self) -> PgSourceConfig {
        let mut config = PgSourceConfig::new(self.database_url.clone(), self.channel.clone());
        config.trigger_tables = self.trigger_tables.clone();
        config
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE_URL)
    }
}

/// Overflow policy as a command-line value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OverflowArg {
    /// Drop the oldest buffered event of the slow subscriber.
    DropOldest,
    /// Disconnect the slow subscriber.
    Disconnect,
}

impl From<OverflowArg> for OverflowPolicy {
    fn from(arg: OverflowArg) -> Self {
        match arg {
            OverflowArg::DropOldest => OverflowPolicy::DropOldest,
            OverflowArg::Disconnect => OverflowPolicy::Disconnect,
        }
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "changehub-server")]
#[command(version, about = "Change notification fan-out hub", long_about = None)]
pub struct Args {
    /// Upstream PostgreSQL URL.
    #[arg(long, default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,

    /// Channel to LISTEN on.
    #[arg(long, default_value = DEFAULT_CHANNEL)]
    pub channel: String,

    /// Accepted topic (repeatable). Defaults to asset, incident, car, user.
    #[arg(long = "topic")]
    pub topics: Vec<String>,

    /// Table alias as TABLE=TOPIC (repeatable), added to the defaults.
    #[arg(long = "alias")]
    pub aliases: Vec<String>,

    /// Events buffered per subscriber.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// What to do when a subscriber's buffer is full.
    #[arg(long, value_enum, default_value_t = OverflowArg::DropOldest)]
    pub overflow: OverflowArg,

    /// First reconnect delay in milliseconds.
    #[arg(long, default_value_t = DEFAULT_BACKOFF_BASE_MS)]
    pub reconnect_base_ms: u64,

    /// Maximum reconnect delay in milliseconds.
    #[arg(long, default_value_t = DEFAULT_BACKOFF_MAX_MS)]
    pub reconnect_max_ms: u64,

    /// Random reduction of each reconnect delay, as a fraction (0.0-1.0).
    #[arg(long, default_value_t = DEFAULT_BACKOFF_JITTER)]
    pub reconnect_jitter: f64,

    /// Connect timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// Install a notify trigger on this table (repeatable).
    #[arg(long = "install-trigger")]
    pub install_triggers: Vec<String>,

    /// Log every event of this topic (repeatable).
    #[arg(long = "tap")]
    pub taps: Vec<String>,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> Result<ServerConfig, Error> {
        let mut config = ServerConfig::new(self.database_url)
            .with_channel(self.channel)
            .with_queue_capacity(self.queue_capacity)
            .with_overflow(self.overflow.into())
            .with_backoff(Backoff::new(
                Duration::from_millis(self.reconnect_base_ms),
                Duration::from_millis(self.reconnect_max_ms),
                self.reconnect_jitter,
            ))
            .with_connect_timeout(Duration::from_secs(self.connect_timeout.max(1)));

        if !self.topics.is_empty() {
            config = config.with_topics(self.topics);
        }
        for alias in &self.aliases {
            let (table, topic) = parse_alias(alias)?;
            config = config.with_alias(table, topic);
        }
        config.trigger_tables = self.install_triggers;
        config.taps = self.taps;

        // Default aliases only make sense for topics that are still served.
        let topics = config.topics.clone();
        config.aliases.retain(|(_, topic)| topics.contains(topic));

        config.validate()?;
        Ok(config)
    }
}

fn parse_alias(value: &str) -> Result<(String, String), Error> {
    match value.split_once('=') {
        Some((table, topic)) if !table.trim().is_empty() && !topic.trim().is_empty() => {
            Ok((table.trim().to_string(), topic.trim().to_string()))
        }
        _ => Err(Error::Config(format!(
            "invalid alias '{}', expected TABLE=TOPIC",
            value
        ))),
    }
}
