//! Fixed-width control tokens and the pong frame

use bytes::{BufMut, Bytes, BytesMut};

/// Width of every control token on the wire
pub const TOKEN_LEN: usize = 10;

/// Width of the pong reply: token plus a 10-digit decimal field
pub const PONG_FRAME_LEN: usize = 2 * TOKEN_LEN;

/// Ping request sent by the daemon
pub const ACTION_PING: &[u8; TOKEN_LEN] = b"ping______";

/// Pong reply sent back to the daemon
pub const ACTION_PONG: &[u8; TOKEN_LEN] = b"pong______";

/// Remote-initiated request to stop the local process
pub const ACTION_STOP_SERVER: &[u8; TOKEN_LEN] = b"stopserver";

/// A control token read from the daemon's output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlToken {
    /// Daemon asks for a pong
    Ping,
    /// Daemon asks the local process to exit
    StopServer,
    /// Anything else; valid on the wire and ignored
    Unknown([u8; TOKEN_LEN]),
}

impl ControlToken {
    /// Classify a raw token
    pub fn parse(raw: &[u8; TOKEN_LEN]) -> Self {
        if raw == ACTION_PING {
            Self::Ping
        } else if raw == ACTION_STOP_SERVER {
            Self::StopServer
        } else {
            Self::Unknown(*raw)
        }
    }

    /// Raw bytes of this token
    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        match self {
            Self::Ping => ACTION_PING,
            Self::StopServer => ACTION_STOP_SERVER,
            Self::Unknown(raw) => raw,
        }
    }
}

/// Outbound reply to a ping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PongFrame {
    /// Reserved for sequence or timing data, always zero today
    pub sequence: u32,
}

impl PongFrame {
    /// Create a pong frame with the given reserved field
    pub fn new(sequence: u32) -> Self {
        Self { sequence }
    }

    /// Encode as `pong token + zero-padded 10-digit decimal`
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PONG_FRAME_LEN);
        buf.put_slice(ACTION_PONG);
        buf.put_slice(format!("{:010}", self.sequence).as_bytes());
        buf.freeze()
    }
}
