//! Upstream notification sources.
//!
//! A source owns one connection to an external event channel. The
//! [`NotificationListener`](crate::NotificationListener) drives it through
//! connect, receive, and disconnect; any pub-sub transport that can do
//! those three things can feed the hub.

mod postgres;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ConnectionError;

pub use postgres::{
    notify_function_sql, notify_trigger_sql, trigger_install_statements, validate_identifier,
    PgNotificationSource, PgSourceConfig,
};

/// One raw notification as delivered by the upstream channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// Channel the notification arrived on.
    pub channel: String,
    /// Undecoded payload.
    pub payload: Bytes,
}

impl RawNotification {
    /// Create a raw notification.
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// A connection to an upstream event channel.
///
/// After `recv` returns an error the connection is considered gone; the
/// listener calls `connect` again to replace it.
#[async_trait]
pub trait NotificationSource: Send {
    /// Human-readable description for logs. Must not include credentials.
    fn describe(&self) -> String;

    /// Open the connection and register interest in the channel.
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Wait for the next notification.
    async fn recv(&mut self) -> Result<RawNotification, ConnectionError>;

    /// Unregister interest and close the connection.
    async fn disconnect(&mut self) -> Result<(), ConnectionError>;
}
