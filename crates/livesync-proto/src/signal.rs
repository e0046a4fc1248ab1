//! Fault reporting shared by session workers
//!
//! Every worker of a running session holds a [`FaultSignal`]. The supervisor
//! holds the single [`FaultReceiver`] and consumes exactly one fault per
//! running episode; later reports are dropped once the slot is full.

use crate::ProtocolError;
use tokio::sync::mpsc;
use tracing::debug;

/// Create a fresh fault signal for one running episode
pub fn fault_channel() -> (FaultSignal, FaultReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (FaultSignal { tx }, FaultReceiver { rx })
}

/// Sending side of the session's error signal
#[derive(Debug, Clone)]
pub struct FaultSignal {
    tx: mpsc::Sender<ProtocolError>,
}

impl FaultSignal {
    /// Report a fault without blocking; dropped if one is already pending
    pub fn report(&self, fault: ProtocolError) {
        if let Err(e) = self.tx.try_send(fault) {
            debug!("Fault not delivered, supervisor already notified: {}", e);
        }
    }
}

/// Receiving side of the session's error signal
#[derive(Debug)]
pub struct FaultReceiver {
    rx: mpsc::Receiver<ProtocolError>,
}

impl FaultReceiver {
    /// Wait for the first fault; `None` once every worker dropped its signal
    pub async fn recv(&mut self) -> Option<ProtocolError> {
        self.rx.recv().await
    }
}
