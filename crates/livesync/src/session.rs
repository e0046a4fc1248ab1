//! Session state and the restart supervisor

use crate::{ChangeForwarder, ForwardContext, LivesyncError, Result};
use livesync_proto::{
    fault_channel, HeartbeatExit, HeartbeatResponder, Multiplexer, ProtocolError, QueueMonitor,
};
use livesync_ssh::{
    BinaryCatalog, Bootstrap, BootstrapConfig, Connection, SshConfig, Transport, TransportError,
};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Host, directories, excludes and remote binary settings
    pub bootstrap: BootstrapConfig,
    /// Reconnect when more bytes than this are queued; 0 disables
    pub send_queue_limit: u64,
    /// Pause between a fault and the next attempt
    pub retry_interval: Duration,
}

/// Builder for a single host's [`SessionConfig`]
pub struct SessionBuilder {
    bootstrap: BootstrapConfig,
    send_queue_limit: u64,
    retry_interval: Duration,
}

impl SessionBuilder {
    /// Start a configuration for `host`, replicating into remote `dir`
    pub fn new(host: impl Into<String>, dir: impl Into<String>) -> Self {
        Self {
            bootstrap: BootstrapConfig {
                host: host.into(),
                dir: dir.into(),
                source_dir: PathBuf::from("."),
                excludes: Default::default(),
                sudo_user: None,
                remote_bin_path: None,
                ssh: SshConfig::default(),
                debug: false,
            },
            send_queue_limit: 0,
            retry_interval: Duration::from_secs(10),
        }
    }

    /// Set the local tree to replicate
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bootstrap.source_dir = dir.into();
        self
    }

    /// Exclude a path pattern
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.bootstrap.excludes.insert(pattern.into());
        self
    }

    /// Run remote commands as `user` through sudo
    pub fn with_sudo_user(mut self, user: impl Into<String>) -> Self {
        self.bootstrap.sudo_user = Some(user.into());
        self
    }

    /// Use a fixed remote daemon path
    pub fn with_remote_bin_path(mut self, path: impl Into<String>) -> Self {
        self.bootstrap.remote_bin_path = Some(path.into());
        self
    }

    /// Set the queued-bytes limit
    pub fn with_send_queue_limit(mut self, limit: u64) -> Self {
        self.send_queue_limit = limit;
        self
    }

    /// Set the pause between attempts
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.bootstrap.ssh.port = Some(port);
        self
    }

    /// Set SSH key path
    pub fn with_key(mut self, key_path: PathBuf) -> Self {
        self.bootstrap.ssh.key_path = Some(key_path);
        self
    }

    /// Set an SSH `-o` option
    pub fn with_ssh_option(mut self, key: String, value: String) -> Self {
        self.bootstrap.ssh.options.insert(key, value);
        self
    }

    /// Start the daemon with `--debug`
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.bootstrap.debug = debug;
        self
    }

    /// Build the session configuration
    pub fn build_config(self) -> SessionConfig {
        SessionConfig {
            bootstrap: self.bootstrap,
            send_queue_limit: self.send_queue_limit,
            retry_interval: self.retry_interval,
        }
    }
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Not started yet
    Idle,
    /// Syncing, discovering, deploying or launching
    Bootstrapping,
    /// Daemon is up and workers are running
    Running,
    /// An attempt failed and is being torn down
    Faulted,
    /// Waiting out the retry interval
    Delaying,
}

/// Per-host replication state; survives reconnects
pub struct Session {
    config: SessionConfig,
    status: watch::Sender<SessionStatus>,
}

impl Session {
    /// Create an idle session
    pub fn new(config: SessionConfig) -> Self {
        let (status, _) = watch::channel(SessionStatus::Idle);
        Self { config, status }
    }

    /// Remote host
    pub fn host(&self) -> &str {
        &self.config.bootstrap.host
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Follow status changes
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, status: SessionStatus) {
        self.status.send_replace(status);
    }
}

/// How one attempt ended
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A worker reported a fault; the session will restart
    Faulted(ProtocolError),
    /// The daemon asked the local process to stop
    ShutdownRequested,
}

/// Returned once a daemon asks the local process to stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownRequest {
    /// Host whose daemon sent stop-server
    pub host: String,
}

/// Runs a session forever, restarting it from bootstrap after every fault
pub struct Supervisor {
    session: Session,
    transport: Arc<dyn Transport>,
    catalog: Arc<dyn BinaryCatalog>,
    forwarder: Arc<dyn ChangeForwarder>,
}

impl Supervisor {
    /// Supervise `session` using the given collaborators
    pub fn new(
        session: Session,
        transport: Arc<dyn Transport>,
        catalog: Arc<dyn BinaryCatalog>,
        forwarder: Arc<dyn ChangeForwarder>,
    ) -> Self {
        Self {
            session,
            transport,
            catalog,
            forwarder,
        }
    }

    /// The supervised session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Keep the session up; returns only when the remote side requests shutdown
    ///
    /// Bootstrap errors and runtime faults take the same path: log, wait the
    /// retry interval, start over with a fresh bootstrap.
    pub async fn run(&self) -> ShutdownRequest {
        let host = self.session.host().to_string();

        loop {
            let attempt = Uuid::new_v4();
            debug!("Starting attempt {} for {}", attempt, host);

            match self.run_attempt().await {
                Ok(AttemptOutcome::ShutdownRequested) => {
                    info!("Session for {} stopped by remote request", host);
                    return ShutdownRequest { host };
                }
                Ok(AttemptOutcome::Faulted(fault)) => {
                    error!("Stopped for server {}: {}", host, fault);
                }
                Err(e) => {
                    error!("Stopped for server {}: {}", host, e);
                    if let Some(stderr) = command_stderr(&e) {
                        debug!("Command stderr for {}:\n{}", host, stderr);
                    }
                }
            }
            debug!("Attempt {} for {} finished", attempt, host);

            self.session.set_status(SessionStatus::Delaying);
            tokio::time::sleep(self.session.config.retry_interval).await;
            info!("Reconnecting to {}", host);
        }
    }

    /// Bootstrap once and run until the first fault or a shutdown request
    pub async fn run_attempt(&self) -> Result<AttemptOutcome> {
        self.session.set_status(SessionStatus::Bootstrapping);
        self.forwarder.discard_backlog().await;

        let bootstrap = Bootstrap::new(
            self.transport.as_ref(),
            &self.session.config.bootstrap,
            self.catalog.as_ref(),
        );
        let mut connection = match bootstrap.run().await {
            Ok(connection) => connection,
            Err(e) => {
                self.session.set_status(SessionStatus::Faulted);
                return Err(e.into());
            }
        };

        let outcome = self.run_connected(&mut connection).await;
        connection.terminate().await;
        outcome
    }

    async fn run_connected(&self, connection: &mut Connection) -> Result<AttemptOutcome> {
        let host = self.session.host().to_string();
        let stdin = connection
            .take_stdin()
            .ok_or_else(|| LivesyncError::Config(format!("No stdin for {}", host)))?;
        let stdout = connection
            .take_stdout()
            .ok_or_else(|| LivesyncError::Config(format!("No stdout for {}", host)))?;

        let stop = CancellationToken::new();
        let (faults, mut fault_rx) = fault_channel();
        let mut workers = JoinSet::new();

        let (multiplexer, writes) =
            Multiplexer::new(host.as_str(), stdin, stop.clone(), faults.clone());
        workers.spawn(multiplexer.run());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let responder = HeartbeatResponder::new(
            host.as_str(),
            stdout,
            writes.clone(),
            stop.clone(),
            faults.clone(),
        );
        workers.spawn(async move {
            if responder.run().await == HeartbeatExit::ShutdownRequested {
                let _ = shutdown_tx.send(());
            }
        });

        let ctx = ForwardContext {
            host: host.clone(),
            writes,
            queue: QueueMonitor::new(host.as_str(), self.session.config.send_queue_limit, faults.clone()),
            stop: stop.clone(),
        };
        let forwarder = Arc::clone(&self.forwarder);
        workers.spawn(async move {
            if let Err(e) = forwarder.forward(ctx).await {
                let fault = match e {
                    LivesyncError::Protocol(fault) => fault,
                    other => ProtocolError::Forwarder(other.to_string()),
                };
                faults.report(fault);
            }
        });

        self.session.set_status(SessionStatus::Running);
        info!("Connected to {}", host);

        let outcome = tokio::select! {
            biased;
            Ok(()) = shutdown_rx => AttemptOutcome::ShutdownRequested,
            Some(fault) = fault_rx.recv() => AttemptOutcome::Faulted(fault),
            else => AttemptOutcome::Faulted(ProtocolError::StreamClosed),
        };

        if matches!(outcome, AttemptOutcome::Faulted(_)) {
            self.session.set_status(SessionStatus::Faulted);
        }
        stop.cancel();
        connection.terminate().await;

        // Workers blocked on the dead streams may not notice the stop signal.
        workers.abort_all();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    warn!("Worker for {} ended abnormally: {}", host, e);
                }
            }
        }

        Ok(outcome)
    }
}

/// Stderr captured from a failed external command, if that is what `err` is
fn command_stderr(err: &LivesyncError) -> Option<&str> {
    match err {
        LivesyncError::Transport(TransportError::CommandFailed { stderr, .. })
            if !stderr.trim().is_empty() =>
        {
            Some(stderr.as_str())
        }
        _ => None,
    }
}
