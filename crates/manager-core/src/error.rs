//! Error types for the manager-protocol client

use thiserror::Error;

/// Result type for manager client operations
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors that can occur while talking to the PBX manager interface
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Socket-level failure (connect, read, or write)
    #[error("connection error: {message}")]
    Connection { message: String },

    /// The manager rejected the login credentials
    #[error("authentication rejected: {message}")]
    Auth { message: String },

    /// No response arrived for an action within its deadline
    #[error("no response within {seconds} seconds")]
    Timeout { seconds: u64 },

    /// The client is not in the ready state (disconnected or degraded)
    #[error("not connected to the manager interface")]
    NotConnected,

    /// The connection dropped while a response was outstanding
    #[error("connection lost while awaiting response")]
    ConnectionLost,

    /// The peer sent something the protocol layer could not make sense of
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl ManagerError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Whether the error indicates the connection itself is unusable
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::NotConnected | Self::ConnectionLost
        )
    }
}

impl From<std::io::Error> for ManagerError {
    fn from(err: std::io::Error) -> Self {
        Self::Connection {
            message: err.to_string(),
        }
    }
}
