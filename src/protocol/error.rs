use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error reported by the server in a `-` frame.
///
/// Any numeric field missing from the frame defaults to `0`, `0` and `-1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub code: i64,
    pub external_code: i64,
    pub offset: i64,
    pub message: String,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (code {}, extended code {}, offset {})",
            self.message, self.code, self.external_code, self.offset
        )
    }
}

/// Driver error taxonomy
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// Socket open/write/read failure or TLS authorization failure
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Malformed frame, unexpected tag, decompression mismatch
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Error frame returned by the server for one command
    #[error("Server error: {0}")]
    ServerError(ServerError),

    /// No complete response within the command deadline
    #[error("Timeout: no response within {0:?}")]
    Timeout(Duration),

    /// Command attempted while the connection cannot carry it
    #[error("Invalid state: {0}")]
    StateError(String),
}

impl DriverError {
    /// Whether the error leaves the socket unusable.
    ///
    /// Server errors are answers to a single command; everything else
    /// except state errors means the stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::ConnectionError(_) | DriverError::ProtocolError(_) | DriverError::Timeout(_)
        )
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        DriverError::ProtocolError(msg.into())
    }
}

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        DriverError::ServerError(err)
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
