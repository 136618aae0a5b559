//! changehub protocol types and payload decoding.
//!
//! This crate defines the change events that flow through the hub and the
//! decoder that turns raw upstream notification payloads into them.
//!
//! # Modules
//!
//! - [`event`] - Domain events and change operations
//! - [`topic`] - Known topics and table-name aliases
//! - [`decoder`] - Raw payload decoding
//! - [`error`] - Decoding error types
//!
//! # Payload format
//!
//! The decoder accepts JSON notifications such as:
//!
//! ```text
//! {"table": "users", "action": "INSERT", "data": {"id": 7, "x": 1.5, "y": 2.0}}
//! {"topic": "asset", "operation": "CREATE", "data": {"id": "a1"}}
//! ```

pub mod decoder;
pub mod error;
pub mod event;
pub mod topic;

pub use decoder::EventDecoder;
pub use error::DecodeError;
pub use event::{DomainEvent, Operation};
pub use topic::TopicRegistry;
