//! Error types for the livesync library

use thiserror::Error;

/// Main error type for livesync operations
#[derive(Debug, Error)]
pub enum LivesyncError {
    /// Transport or bootstrap errors
    #[error("Transport error: {0}")]
    Transport(#[from] livesync_ssh::TransportError),

    /// Runtime protocol faults
    #[error("Protocol error: {0}")]
    Protocol(#[from] livesync_proto::ProtocolError),

    /// Invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for LivesyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}
