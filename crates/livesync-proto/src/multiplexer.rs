//! Single-writer multiplexer for the transport's input stream
//!
//! Producers hand buffers over through a [`WriteHandle`]. The [`Multiplexer`]
//! takes exactly one [`PendingWrite`] at a time, writes and flushes it, then
//! acknowledges it before taking the next one. Submissions are served in the
//! order they reached the hand-off, so a buffer submitted before another is
//! fully on the wire, and acknowledged, before the later one starts.

use crate::{FaultSignal, ProtocolError};
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A buffer handed to the multiplexer together with its completion ack
#[derive(Debug)]
pub struct PendingWrite {
    /// Bytes to write, in full
    pub buf: Bytes,
    /// Fired once `buf` has been written and flushed
    pub ack: oneshot::Sender<()>,
}

impl PendingWrite {
    /// Pair a buffer with a fresh acknowledgment channel
    pub fn new(buf: Bytes) -> (Self, oneshot::Receiver<()>) {
        let (ack, done) = oneshot::channel();
        (Self { buf, ack }, done)
    }
}

/// Producer side of the multiplexer
#[derive(Debug, Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<PendingWrite>,
}

impl WriteHandle {
    /// Submit a buffer and wait until it has been fully written
    pub async fn write(&self, buf: Bytes) -> Result<(), ProtocolError> {
        let (pending, done) = PendingWrite::new(buf);
        self.submit(pending).await?;
        done.await.map_err(|_| ProtocolError::StreamClosed)
    }

    /// Hand over a pending write without waiting for its acknowledgment
    pub async fn submit(&self, pending: PendingWrite) -> Result<(), ProtocolError> {
        self.tx
            .send(pending)
            .await
            .map_err(|_| ProtocolError::StreamClosed)
    }
}

/// Owner of the transport's input stream
pub struct Multiplexer<W> {
    host: String,
    writer: W,
    rx: mpsc::Receiver<PendingWrite>,
    stop: CancellationToken,
    faults: FaultSignal,
}

impl<W> Multiplexer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Create a multiplexer over `writer` and the handle producers submit through
    pub fn new(
        host: impl Into<String>,
        writer: W,
        stop: CancellationToken,
        faults: FaultSignal,
    ) -> (Self, WriteHandle) {
        // One slot: the next submission waits here while the current one is
        // being written, and is only taken after the current ack has fired.
        let (tx, rx) = mpsc::channel(1);
        let multiplexer = Self {
            host: host.into(),
            writer,
            rx,
            stop,
            faults,
        };
        (multiplexer, WriteHandle { tx })
    }

    /// Serve submissions until stopped, every producer is gone, or a write fails
    pub async fn run(mut self) {
        debug!("Starting stdin writer for {}", self.host);

        loop {
            let pending = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(pending) => pending,
                    None => break,
                },
            };

            trace!("Writing {} bytes to {}", pending.buf.len(), self.host);
            if let Err(source) = self.write_buf(&pending.buf).await {
                self.faults.report(ProtocolError::Write {
                    host: self.host.clone(),
                    source,
                });
                break;
            }

            if self.stop.is_cancelled() {
                break;
            }
            // Producer may have given up waiting; nothing to do then.
            let _ = pending.ack.send(());
        }

        debug!("Stdin writer for {} stopped", self.host);
    }

    async fn write_buf(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(buf).await?;
        self.writer.flush().await
    }
}
