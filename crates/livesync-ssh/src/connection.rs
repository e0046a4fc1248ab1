//! Live transport process ownership

use crate::TransportError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tracing::{debug, warn};

/// Boxed input stream of a transport
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Boxed output stream of a transport
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// A running transport process and its byte streams
///
/// The streams are taken out once by the protocol workers; the process stays
/// here so the session can force-terminate it on teardown.
pub struct Connection {
    /// Transport process handle, absent for in-memory transports
    process: Option<Child>,
    /// Daemon's input stream
    stdin: Option<BoxedWriter>,
    /// Daemon's output stream
    stdout: Option<BoxedReader>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("process", &self.process)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .finish()
    }
}

impl Connection {
    /// Wrap a spawned process whose stdin and stdout are piped
    pub fn from_child(mut child: Child) -> Result<Self, TransportError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Configuration("Cannot get stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Configuration("Cannot get stdout pipe".to_string()))?;

        Ok(Self {
            process: Some(child),
            stdin: Some(Box::new(stdin)),
            stdout: Some(Box::new(stdout)),
        })
    }

    /// Wrap arbitrary streams with no process behind them
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            process: None,
            stdin: Some(Box::new(writer)),
            stdout: Some(Box::new(reader)),
        }
    }

    /// Process id of the transport, if it is a live process
    pub fn id(&self) -> Option<u32> {
        self.process.as_ref().and_then(Child::id)
    }

    /// Take the daemon's input stream
    pub fn take_stdin(&mut self) -> Option<BoxedWriter> {
        self.stdin.take()
    }

    /// Take the daemon's output stream
    pub fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.stdout.take()
    }

    /// Kill the transport process if it is still alive and reap it
    ///
    /// An exit caused by the kill is expected and not reported; only failures
    /// to kill or to wait are logged.
    pub async fn terminate(&mut self) {
        self.stdin = None;
        self.stdout = None;

        let Some(mut child) = self.process.take() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Transport process already exited with status: {}", status);
                return;
            }
            Ok(None) => {
                if let Err(e) = child.start_kill() {
                    warn!("Could not kill transport process: {}", e);
                }
            }
            Err(e) => warn!("Could not poll transport process: {}", e),
        }

        match child.wait().await {
            Ok(status) => debug!("Transport process exited with status: {}", status),
            Err(e) => warn!("Could not wait for transport process: {}", e),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(mut child) = self.process.take() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandSpec, ProcessTransport, Transport};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_in_memory_connection() {
        let (ours, mut theirs) = tokio::io::duplex(16);
        let (reader, writer) = tokio::io::split(ours);
        let mut conn = Connection::from_io(reader, writer);
        assert!(conn.id().is_none());

        let mut stdin = conn.take_stdin().unwrap();
        stdin.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        theirs.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        assert!(conn.take_stdin().is_none());
        conn.terminate().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_running_process() {
        let transport = ProcessTransport::new();
        let mut conn = transport.spawn(&CommandSpec::new("cat")).await.unwrap();
        assert!(conn.id().is_some());

        let mut stdout = conn.take_stdout().unwrap();
        conn.terminate().await;
        assert!(conn.id().is_none());

        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_after_natural_exit() {
        let transport = ProcessTransport::new();
        let mut conn = transport.spawn(&CommandSpec::new("true")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        conn.terminate().await;
        conn.terminate().await;
    }
}
