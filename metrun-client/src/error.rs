//! Error types for the metrun client

use std::path::PathBuf;
use thiserror::Error;

use metrun_core::protocol::ProtocolError;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the controller
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not connect to the control socket
    #[error("Failed to connect to controller at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The controller binary could not be started
    #[error("Failed to start controller '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing the socket failed
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    /// No reply arrived in time
    #[error("Controller did not reply to '{0}' in time")]
    Timeout(String),

    /// The controller closed the connection
    #[error("Controller closed the connection")]
    Disconnected,

    /// A request could not be encoded
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] ProtocolError),

    /// The reply did not have the expected shape
    #[error("Unexpected reply to '{request}': {reply}")]
    UnexpectedReply { request: String, reply: String },

    /// A JSON reply could not be decoded
    #[error("Failed to parse reply: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl ClientError {
    pub fn unexpected(request: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::UnexpectedReply {
            request: request.into(),
            reply: reply.into(),
        }
    }

    /// Check if the controller is simply not there
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Disconnected)
    }
}
