//! Ping/pong and remote control handling
//!
//! The daemon writes fixed-width control tokens to its output stream. Pings
//! are answered through the multiplexer, one at a time: the pong must be on
//! the wire before the next token is read. A stop-server token ends the
//! responder with [`HeartbeatExit::ShutdownRequested`]; terminating the local
//! process is left to whoever owns it.

use crate::token::{ControlToken, PongFrame, TOKEN_LEN};
use crate::{FaultSignal, ProtocolError, WriteHandle};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why the responder loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// The session's stop signal was raised
    Stopped,
    /// Reading or answering failed; a fault has been reported
    Failed,
    /// The daemon sent stop-server
    ShutdownRequested,
}

/// Reads control tokens from the daemon and answers them
pub struct HeartbeatResponder<R> {
    host: String,
    reader: R,
    writes: WriteHandle,
    stop: CancellationToken,
    faults: FaultSignal,
}

impl<R> HeartbeatResponder<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a responder reading from the daemon's output stream
    pub fn new(
        host: impl Into<String>,
        reader: R,
        writes: WriteHandle,
        stop: CancellationToken,
        faults: FaultSignal,
    ) -> Self {
        Self {
            host: host.into(),
            reader,
            writes,
            stop,
            faults,
        }
    }

    /// Run until stopped, failed, or told to shut down
    pub async fn run(mut self) -> HeartbeatExit {
        let pong = PongFrame::default().encode();
        let mut buf = [0u8; TOKEN_LEN];

        loop {
            let read = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return HeartbeatExit::Stopped,
                read = self.reader.read_exact(&mut buf) => read,
            };

            if let Err(source) = read {
                self.faults.report(ProtocolError::Read {
                    host: self.host.clone(),
                    source,
                });
                return HeartbeatExit::Failed;
            }
            debug!("Read {} bytes from {}: {:?}", TOKEN_LEN, self.host, buf);

            match ControlToken::parse(&buf) {
                ControlToken::Ping => {
                    let written = tokio::select! {
                        biased;
                        _ = self.stop.cancelled() => return HeartbeatExit::Stopped,
                        written = self.writes.write(pong.clone()) => written,
                    };
                    if let Err(e) = written {
                        self.faults.report(e);
                        return HeartbeatExit::Failed;
                    }
                }
                ControlToken::StopServer => {
                    info!("Got StopServer command from the remote server {}", self.host);
                    return HeartbeatExit::ShutdownRequested;
                }
                ControlToken::Unknown(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{ACTION_PING, ACTION_PONG, ACTION_STOP_SERVER, PONG_FRAME_LEN};
    use crate::{fault_channel, Multiplexer};
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

    struct Harness {
        /// Daemon's end of its output stream
        daemon_out: DuplexStream,
        /// Daemon's end of its input stream
        daemon_in: DuplexStream,
        stop: CancellationToken,
        faults: crate::FaultReceiver,
        responder: tokio::task::JoinHandle<HeartbeatExit>,
    }

    fn start() -> Harness {
        let (stdin, daemon_in) = tokio::io::duplex(64);
        let (daemon_out, stdout) = tokio::io::duplex(64);
        let (signal, faults) = fault_channel();
        let stop = CancellationToken::new();

        let (mux, writes) = Multiplexer::new("web1", stdin, stop.clone(), signal.clone());
        tokio::spawn(mux.run());
        let responder = HeartbeatResponder::new("web1", stdout, writes, stop.clone(), signal);

        Harness {
            daemon_out,
            daemon_in,
            stop,
            faults,
            responder: tokio::spawn(responder.run()),
        }
    }

    async fn read_pong(stream: &mut DuplexStream) -> [u8; PONG_FRAME_LEN] {
        let mut pong = [0u8; PONG_FRAME_LEN];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut pong))
            .await
            .expect("no pong")
            .unwrap();
        pong
    }

    #[tokio::test]
    async fn test_each_ping_gets_one_pong() {
        let mut h = start();

        for _ in 0..3 {
            h.daemon_out.write_all(ACTION_PING).await.unwrap();
            let pong = read_pong(&mut h.daemon_in).await;
            assert_eq!(&pong[..TOKEN_LEN], ACTION_PONG);
            assert_eq!(&pong[TOKEN_LEN..], b"0000000000");
        }

        h.stop.cancel();
        assert_eq!(h.responder.await.unwrap(), HeartbeatExit::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_tokens_are_ignored() {
        let mut h = start();

        h.daemon_out.write_all(b"whatever!!").await.unwrap();
        h.daemon_out.write_all(ACTION_PONG).await.unwrap();
        h.daemon_out.write_all(ACTION_PING).await.unwrap();

        // Only the ping is answered.
        let pong = read_pong(&mut h.daemon_in).await;
        assert_eq!(&pong[..TOKEN_LEN], ACTION_PONG);
        let mut extra = [0u8; 1];
        let more = tokio::time::timeout(Duration::from_millis(50), h.daemon_in.read(&mut extra)).await;
        assert!(more.is_err(), "unexpected extra output");

        h.stop.cancel();
        assert_eq!(h.responder.await.unwrap(), HeartbeatExit::Stopped);
    }

    #[tokio::test]
    async fn test_stop_server_requests_shutdown() {
        let mut h = start();

        h.daemon_out.write_all(ACTION_STOP_SERVER).await.unwrap();
        assert_eq!(h.responder.await.unwrap(), HeartbeatExit::ShutdownRequested);
    }

    #[tokio::test]
    async fn test_short_read_reports_fault() {
        let mut h = start();

        h.daemon_out.write_all(b"ping").await.unwrap();
        drop(h.daemon_out);

        assert_eq!(h.responder.await.unwrap(), HeartbeatExit::Failed);
        match h.faults.recv().await {
            Some(ProtocolError::Read { host, source }) => {
                assert_eq!(host, "web1");
                assert_eq!(source.kind(), std::io::ErrorKind::UnexpectedEof);
            }
            other => panic!("unexpected fault: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fragmented_tokens_are_reassembled() {
        let stdout = tokio_test::io::Builder::new()
            .read(b"pin")
            .read(b"g______")
            .read(ACTION_STOP_SERVER)
            .build();
        let stdin = tokio_test::io::Builder::new()
            .write(&PongFrame::default().encode())
            .build();
        let (signal, _faults) = fault_channel();
        let stop = CancellationToken::new();

        let (mux, writes) = Multiplexer::new("web1", stdin, stop.clone(), signal.clone());
        let mux = tokio::spawn(mux.run());
        let responder = HeartbeatResponder::new("web1", stdout, writes, stop.clone(), signal);

        assert_eq!(responder.run().await, HeartbeatExit::ShutdownRequested);
        stop.cancel();
        mux.await.unwrap();
    }

    /// Counts complete pong frames as the multiplexer writes them
    struct PongCounter {
        written: usize,
        pongs: Arc<AtomicUsize>,
    }

    impl AsyncWrite for PongCounter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.written += buf.len();
            self.pongs.store(self.written / PONG_FRAME_LEN, Ordering::SeqCst);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Hands out one token per read and notes how many pongs were out by then
    struct TokenSource {
        tokens: VecDeque<&'static [u8; TOKEN_LEN]>,
        pongs: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<usize>>>,
    }

    impl AsyncRead for TokenSource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if let Some(token) = self.tokens.pop_front() {
                let pongs = self.pongs.load(Ordering::SeqCst);
                self.seen.lock().unwrap().push(pongs);
                buf.put_slice(token);
            }
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_pong_is_written_before_next_read() {
        let pongs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stdout = TokenSource {
            tokens: [ACTION_PING, ACTION_PING, ACTION_PING, ACTION_STOP_SERVER].into(),
            pongs: pongs.clone(),
            seen: seen.clone(),
        };
        let stdin = PongCounter {
            written: 0,
            pongs: pongs.clone(),
        };
        let (signal, _faults) = fault_channel();
        let stop = CancellationToken::new();

        let (mux, writes) = Multiplexer::new("web1", stdin, stop.clone(), signal.clone());
        let mux = tokio::spawn(mux.run());
        let responder = HeartbeatResponder::new("web1", stdout, writes, stop.clone(), signal);

        assert_eq!(responder.run().await, HeartbeatExit::ShutdownRequested);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);

        stop.cancel();
        mux.await.unwrap();
    }
}
