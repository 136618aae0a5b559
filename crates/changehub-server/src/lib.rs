//! changehub server library.
//!
//! This crate connects the broadcast hub to an upstream LISTEN/NOTIFY-style
//! channel: it owns the upstream connection, decodes notifications, and
//! reconnects with backoff when the connection drops.

pub mod backoff;
pub mod config;
pub mod error;
pub mod listener;
pub mod source;
pub mod tap;

pub use backoff::Backoff;
pub use config::{Args, ServerConfig};
pub use error::{ConnectionError, Error};
pub use listener::{ListenerMetrics, ListenerState, ListenerStatus, NotificationListener};
pub use source::{NotificationSource, PgNotificationSource, PgSourceConfig, RawNotification};
pub use tap::{run_tap, spawn_tap};
