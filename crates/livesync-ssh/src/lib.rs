//! # Livesync SSH Transport
//!
//! Remote-shell plumbing for livesync: ssh/scp/rsync invocations, the owned
//! transport process, and the bootstrap that brings a daemon up on a host.

#![warn(missing_docs)]

/// External command description and shell-safe rendering
pub mod command;

/// Transport abstraction and the process-backed implementation
pub mod transport;

/// Live transport process ownership
pub mod connection;

/// Full-tree rsync invocation
pub mod sync;

/// Remote daemon bootstrap
pub mod bootstrap;

/// SSH-specific error types
pub mod error;

pub use command::CommandSpec;
pub use transport::{ProcessTransport, SshConfig, Transport};
pub use connection::{BoxedReader, BoxedWriter, Connection};
pub use sync::SyncCommand;
pub use bootstrap::{
    BinaryCatalog, Bootstrap, BootstrapConfig, DiscoveryResult, LocalBinaries, REMOTE_BINARY,
    REMOTE_STAGING_DIR,
};
pub use error::TransportError;
