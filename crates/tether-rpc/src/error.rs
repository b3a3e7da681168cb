//! Error types for the server and client ends of a connection.

use crate::types::Status;
use thiserror::Error;

/// Errors raised while starting or running a server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server task failed: {0}")]
    Task(String),
}

/// Errors surfaced to client code.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The server answered with an error status.
    #[error("{0}")]
    Status(Status),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection closed")]
    Disconnected,

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Failed to interpret reply: {0}")]
    Decode(String),
}

impl ClientError {
    /// Status carried by the error, if the server produced it.
    pub fn status(&self) -> Option<&Status> {
        match self {
            ClientError::Status(status) => Some(status),
            _ => None,
        }
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        ClientError::Status(status)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl From<tether_core::error::CoreError> for ClientError {
    fn from(err: tether_core::error::CoreError) -> Self {
        ClientError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusCode;

    #[test]
    fn test_status_is_reraised() {
        let err: ClientError = Status::unauthenticated("Session expired").into();
        assert_eq!(err.to_string(), "UNAUTHENTICATED: Session expired");
        assert_eq!(err.status().map(|s| s.code), Some(StatusCode::Unauthenticated));
        assert!(ClientError::Disconnected.status().is_none());
    }
}
