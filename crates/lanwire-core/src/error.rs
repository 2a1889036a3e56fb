// SPDX-License-Identifier: AGPL-3.0
// Lanwire - Engine error taxonomy

use crate::types::TransferStatus;

/// Error types surfaced by the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed announce payload; rejected before any state is created
    #[error("Invalid transfer request: {0}")]
    Validation(String),

    /// Token mismatch on a chunk upload
    #[error("Invalid or expired token")]
    Unauthorized,

    /// Operation not valid for the transfer's current status
    #[error("Operation not valid in status {status:?}: {reason}")]
    InvalidState {
        status: TransferStatus,
        reason: String,
    },

    /// Unknown transfer or favorite identifier
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection failure during announce/poll/chunk; transient,
    /// eligible for bounded retry
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// The peer declined the transfer
    #[error("Transfer rejected by peer")]
    Rejected,

    /// The transfer was cancelled locally
    #[error("Transfer cancelled")]
    Cancelled,

    /// Disk failure; fatal for the transfer, not retried
    #[error("File I/O error: {0}")]
    FileIo(String),

    /// Store write failure; in-memory state is not rolled back
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Server not running")]
    ServerNotRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Transient errors may be retried with backoff before a transfer
    /// transitions to failed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::ConnectionRefused(_))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::FileIo(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
