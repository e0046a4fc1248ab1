//! # Livesync Protocol
//!
//! Control tokens, heartbeat handling and the single-writer multiplexer that
//! owns the daemon's input stream.

#![warn(missing_docs)]

/// Fixed-width control tokens and the pong frame
pub mod token;

/// Single-writer multiplexer for the transport's input stream
pub mod multiplexer;

/// Ping/pong and remote control handling
pub mod heartbeat;

/// Fault reporting shared by session workers
pub mod signal;

/// Queued-bytes circuit breaker
pub mod backpressure;

/// Error types for protocol operations
pub mod error;

pub use token::{ControlToken, PongFrame, TOKEN_LEN, PONG_FRAME_LEN};
pub use multiplexer::{Multiplexer, PendingWrite, WriteHandle};
pub use heartbeat::{HeartbeatExit, HeartbeatResponder};
pub use signal::{fault_channel, FaultReceiver, FaultSignal};
pub use backpressure::QueueMonitor;
pub use error::ProtocolError;
