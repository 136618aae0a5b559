//! Decoding error types.

use thiserror::Error;

/// Errors produced while decoding a raw upstream notification.
///
/// Both variants are recoverable: the caller logs and drops the event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload could not be parsed into a change event.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The payload names a topic that is not registered.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
}
