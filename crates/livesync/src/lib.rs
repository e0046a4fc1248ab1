//! # Livesync
//!
//! Client side of a live file-replication tool. For every configured host a
//! supervised session mirrors the source tree with rsync, brings up a
//! matching daemon over ssh, and keeps its stdin/stdout busy with change data
//! and heartbeats, starting over from scratch whenever anything breaks.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use livesync_proto as proto;
pub use livesync_ssh as ssh;

/// Error types for the livesync library
pub mod error;

/// Settings file and per-host configuration
pub mod config;

/// Change producer contract and the channel-backed forwarder
pub mod forwarder;

/// Session state and the restart supervisor
pub mod session;

pub use error::LivesyncError;
pub use config::{HostConfig, Settings};
pub use forwarder::{ChangeForwarder, ChangeQueue, ChangeSender, ForwardContext, IdleForwarder};
pub use session::{
    AttemptOutcome, Session, SessionBuilder, SessionConfig, SessionStatus, ShutdownRequest,
    Supervisor,
};

/// Result type alias for livesync operations
pub type Result<T> = std::result::Result<T, LivesyncError>;
