//! Queued-bytes circuit breaker
//!
//! There is no throttling: once the producer side reports more queued bytes
//! than the configured limit, the session is faulted and reconnects.

use crate::{FaultSignal, ProtocolError};
use tracing::warn;

/// Checks queued outbound bytes against a per-host limit
#[derive(Debug, Clone)]
pub struct QueueMonitor {
    host: String,
    limit: u64,
    faults: FaultSignal,
}

impl QueueMonitor {
    /// Create a monitor; a `limit` of zero disables the check
    pub fn new(host: impl Into<String>, limit: u64, faults: FaultSignal) -> Self {
        Self {
            host: host.into(),
            limit,
            faults,
        }
    }

    /// Configured limit, zero meaning unlimited
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Report the current queue size, faulting the session when over the limit
    pub fn notify(&self, queued: u64) -> Result<(), ProtocolError> {
        if self.limit != 0 && queued > self.limit {
            warn!("SendQueueSize limit exceeded for {}: {} > {}", self.host, queued, self.limit);
            self.faults.report(ProtocolError::QueueLimitExceeded {
                host: self.host.clone(),
                queued,
                limit: self.limit,
            });
            return Err(ProtocolError::QueueLimitExceeded {
                host: self.host.clone(),
                queued,
                limit: self.limit,
            });
        }
        Ok(())
    }
}
