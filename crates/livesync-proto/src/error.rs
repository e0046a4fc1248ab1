//! Error types for protocol operations

use std::io;
use thiserror::Error;

/// Runtime faults raised by session workers
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Writing to the daemon's input stream failed
    #[error("Could not write to server {host}: {source}")]
    Write {
        /// Remote host the stream belongs to
        host: String,
        /// Underlying I/O error
        source: io::Error,
    },

    /// Reading a control token from the daemon's output stream failed
    #[error("Could not read from server {host}: {source}")]
    Read {
        /// Remote host the stream belongs to
        host: String,
        /// Underlying I/O error (short reads surface as `UnexpectedEof`)
        source: io::Error,
    },

    /// Queued bytes went over the configured limit
    #[error("SendQueueSize limit exceeded for {host}: {queued} > {limit}")]
    QueueLimitExceeded {
        /// Remote host the queue feeds
        host: String,
        /// Bytes currently queued
        queued: u64,
        /// Configured limit
        limit: u64,
    },

    /// The multiplexer is gone and no longer accepts writes
    #[error("Write stream closed")]
    StreamClosed,

    /// The change forwarder failed
    #[error("Change forwarder failed: {0}")]
    Forwarder(String),
}
