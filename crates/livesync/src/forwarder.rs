//! Change producer contract and the channel-backed forwarder
//!
//! Computing the change set is not this crate's business. A
//! [`ChangeForwarder`] is handed the session's write handle and queue monitor
//! for each running episode and pushes whatever buffers it has.

use crate::{LivesyncError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use livesync_proto::{QueueMonitor, WriteHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a forwarder gets for one running episode
#[derive(Debug, Clone)]
pub struct ForwardContext {
    /// Remote host
    pub host: String,
    /// Submit buffers to the daemon's input stream
    pub writes: WriteHandle,
    /// Report queued bytes; over the limit the session reconnects
    pub queue: QueueMonitor,
    /// Raised when the episode is being torn down
    pub stop: CancellationToken,
}

/// Producer of outbound change buffers
#[async_trait]
pub trait ChangeForwarder: Send + Sync {
    /// Called before every full sync; whatever is pending is covered by it
    async fn discard_backlog(&self) {}

    /// Forward buffers until `ctx.stop` is raised; an error faults the session
    async fn forward(&self, ctx: ForwardContext) -> Result<()>;
}

/// Forwarder with nothing to send; only keeps the session company
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleForwarder;

#[async_trait]
impl ChangeForwarder for IdleForwarder {
    async fn forward(&self, ctx: ForwardContext) -> Result<()> {
        ctx.stop.cancelled().await;
        Ok(())
    }
}

/// Producer handle of a [`ChangeQueue`]
#[derive(Debug, Clone)]
pub struct ChangeSender {
    tx: mpsc::UnboundedSender<Bytes>,
    queued: Arc<AtomicU64>,
}

impl ChangeSender {
    /// Queue a buffer for the daemon
    pub fn send(&self, buf: Bytes) -> Result<()> {
        let len = buf.len() as u64;
        self.queued.fetch_add(len, Ordering::SeqCst);
        self.tx.send(buf).map_err(|_| {
            self.queued.fetch_sub(len, Ordering::SeqCst);
            LivesyncError::Config("Change queue closed".to_string())
        })
    }

    /// Bytes queued and not yet written
    pub fn queued_bytes(&self) -> u64 {
        self.queued.load(Ordering::SeqCst)
    }
}

/// Unbounded buffer queue that outlives reconnects
///
/// Buffers queued before a full sync starts are discarded, since the sync
/// copies the same files; buffers queued once it has started are written
/// after the daemon is up and are not counted against the queue limit of
/// that episode. A buffer whose write fails is dropped, and going
/// over the queue limit drops everything queued; the full sync of the next
/// attempt covers both.
#[derive(Debug)]
pub struct ChangeQueue {
    sender: ChangeSender,
    rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl Default for ChangeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: ChangeSender {
                tx,
                queued: Arc::new(AtomicU64::new(0)),
            },
            rx: Mutex::new(rx),
        }
    }

    /// Handle for producers
    pub fn sender(&self) -> ChangeSender {
        self.sender.clone()
    }
}

#[async_trait]
impl ChangeForwarder for ChangeQueue {
    async fn discard_backlog(&self) {
        let mut rx = self.rx.lock().await;
        let mut dropped = 0u64;
        while let Ok(stale) = rx.try_recv() {
            dropped += stale.len() as u64;
        }
        if dropped > 0 {
            self.sender.queued.fetch_sub(dropped, Ordering::SeqCst);
            debug!("Discarded {} queued bytes ahead of full sync", dropped);
        }
    }

    async fn forward(&self, ctx: ForwardContext) -> Result<()> {
        let mut rx = self.rx.lock().await;
        // Bytes queued while the daemon was not up yet do not count against the limit.
        let mut carried = self.sender.queued_bytes();

        loop {
            let buf = tokio::select! {
                biased;
                _ = ctx.stop.cancelled() => return Ok(()),
                buf = rx.recv() => match buf {
                    Some(buf) => buf,
                    None => return Ok(()),
                },
            };

            let len = buf.len() as u64;
            let queued = self.sender.queued_bytes().saturating_sub(carried);
            carried = carried.saturating_sub(len);
            if let Err(e) = ctx.queue.notify(queued) {
                // Everything queued is covered by the next attempt's full sync.
                let mut dropped = len;
                while let Ok(stale) = rx.try_recv() {
                    dropped += stale.len() as u64;
                }
                self.sender.queued.fetch_sub(dropped, Ordering::SeqCst);
                return Err(e.into());
            }

            let written = tokio::select! {
                biased;
                _ = ctx.stop.cancelled() => None,
                written = ctx.writes.write(buf) => Some(written),
            };
            self.sender.queued.fetch_sub(len, Ordering::SeqCst);

            match written {
                Some(Ok(())) => debug!("Forwarded {} bytes to {}", len, ctx.host),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_proto::{fault_channel, Multiplexer, ProtocolError};
    use tokio::io::AsyncReadExt;

    fn context(limit: u64) -> (ForwardContext, tokio::io::DuplexStream, livesync_proto::FaultReceiver) {
        let (stdin, daemon) = tokio::io::duplex(1024);
        let (signal, faults) = fault_channel();
        let stop = CancellationToken::new();
        let (mux, writes) = Multiplexer::new("web1", stdin, stop.clone(), signal.clone());
        tokio::spawn(mux.run());

        let ctx = ForwardContext {
            host: "web1".to_string(),
            writes,
            queue: QueueMonitor::new("web1", limit, signal),
            stop,
        };
        (ctx, daemon, faults)
    }

    #[tokio::test]
    async fn test_queued_buffers_are_forwarded_in_order() {
        let queue = Arc::new(ChangeQueue::new());
        let sender = queue.sender();
        sender.send(Bytes::from_static(b"first,")).unwrap();
        sender.send(Bytes::from_static(b"second")).unwrap();
        assert_eq!(sender.queued_bytes(), 12);

        let (ctx, mut daemon, _faults) = context(0);
        let stop = ctx.stop.clone();
        let forwarder = queue.clone();
        let task = tokio::spawn(async move { forwarder.forward(ctx).await });

        let mut buf = [0u8; 12];
        daemon.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"first,second");

        stop.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(sender.queued_bytes(), 0);
    }

    #[tokio::test]
    async fn test_queue_limit_faults_session() {
        let queue = Arc::new(ChangeQueue::new());
        let sender = queue.sender();

        let (ctx, _daemon, mut faults) = context(100);
        let forwarder = queue.clone();
        let task = tokio::spawn(async move { forwarder.forward(ctx).await });
        tokio::task::yield_now().await;
        sender.send(Bytes::from(vec![0u8; 64])).unwrap();
        sender.send(Bytes::from(vec![0u8; 64])).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            LivesyncError::Protocol(ProtocolError::QueueLimitExceeded { queued: 128, limit: 100, .. })
        ));
        assert!(matches!(
            faults.recv().await,
            Some(ProtocolError::QueueLimitExceeded { .. })
        ));
        assert_eq!(sender.queued_bytes(), 0);
    }

    #[tokio::test]
    async fn test_backlog_is_discarded_before_sync() {
        let queue = Arc::new(ChangeQueue::new());
        let sender = queue.sender();
        sender.send(Bytes::from(vec![0u8; 150])).unwrap();

        queue.discard_backlog().await;
        assert_eq!(sender.queued_bytes(), 0);

        sender.send(Bytes::from_static(b"after")).unwrap();
        let (ctx, mut daemon, _faults) = context(100);
        let stop = ctx.stop.clone();
        let forwarder = queue.clone();
        let task = tokio::spawn(async move { forwarder.forward(ctx).await });

        let mut buf = [0u8; 5];
        daemon.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"after");

        stop.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_carried_bytes_do_not_count_against_limit() {
        let queue = Arc::new(ChangeQueue::new());
        let sender = queue.sender();
        sender.send(Bytes::from(vec![1u8; 150])).unwrap();

        let (ctx, mut daemon, _faults) = context(100);
        let stop = ctx.stop.clone();
        let forwarder = queue.clone();
        let task = tokio::spawn(async move { forwarder.forward(ctx).await });

        let mut buf = vec![0u8; 150];
        daemon.read_exact(&mut buf).await.unwrap();
        assert!(buf.iter().all(|b| *b == 1));

        stop.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(sender.queued_bytes(), 0);
    }

    #[tokio::test]
    async fn test_idle_forwarder_waits_for_stop() {
        let (ctx, _daemon, _faults) = context(0);
        let stop = ctx.stop.clone();
        let task = tokio::spawn(async move { IdleForwarder.forward(ctx).await });

        stop.cancel();
        task.await.unwrap().unwrap();
    }
}
