//! SSH-specific error types

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Transport and bootstrap errors; each one aborts the current attempt
#[derive(Debug, Error)]
pub enum TransportError {
    /// Initial rsync failed
    #[error("Cannot perform initial sync, please ensure that you can execute: {command}")]
    Sync {
        /// Shell-quoted rsync command line
        command: String,
    },

    /// Remote discovery output could not be parsed
    #[error("Unexpected discovery output from {host}: expected 4 lines, got {lines}")]
    Discovery {
        /// Remote host
        host: String,
        /// Number of lines received
        lines: usize,
    },

    /// No prebuilt daemon for the remote platform
    #[error("Cannot find livesync binary for remote host ({})", path.display())]
    MissingBinary {
        /// Local path that was looked up
        path: PathBuf,
    },

    /// The daemon process could not be started
    #[error("Cannot start command {command}: {source}")]
    Launch {
        /// Shell-quoted command line
        command: String,
        /// Underlying spawn error
        source: io::Error,
    },

    /// A command ran but exited unsuccessfully
    #[error("Command failed with exit code {code:?}: {command}")]
    CommandFailed {
        /// Shell-quoted command line
        command: String,
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
