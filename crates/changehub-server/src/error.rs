//! Server error types.

use thiserror::Error;

/// Failures of the upstream notification connection.
///
/// These never reach hub callers; the listener logs them and reconnects.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Network or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Connecting or unregistering took too long.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The upstream closed the connection.
    #[error("connection closed: {0}")]
    Closed(String),

    /// An operation needed an established connection.
    #[error("not connected")]
    NotConnected,
}

impl From<sqlx::Error> for ConnectionError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) => {
                // SQLSTATE class 28: invalid authorization specification.
                let is_auth = db.code().map(|code| code.starts_with("28")).unwrap_or(false);
                if is_auth {
                    ConnectionError::Auth(db.message().to_string())
                } else {
                    ConnectionError::Transport(db.message().to_string())
                }
            }
            sqlx::Error::PoolTimedOut => {
                ConnectionError::Timeout("waiting for a connection".to_string())
            }
            sqlx::Error::PoolClosed => ConnectionError::Closed("pool closed".to_string()),
            sqlx::Error::WorkerCrashed => {
                ConnectionError::Closed("connection worker crashed".to_string())
            }
            other => ConnectionError::Transport(other.to_string()),
        }
    }
}

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Upstream connection error.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
