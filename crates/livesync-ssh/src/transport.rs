//! Transport abstraction and the process-backed implementation

use crate::{CommandSpec, Connection, TransportError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs the external commands a session needs
///
/// Bootstrap only talks to remote hosts through this trait, so tests can
/// script every step without spawning anything.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a command to completion and return its standard output
    async fn execute(&self, command: &CommandSpec) -> Result<String, TransportError>;

    /// Start a long-lived command with piped stdin/stdout
    async fn spawn(&self, command: &CommandSpec) -> Result<Connection, TransportError>;
}

/// SSH connection options shared by ssh, scp and rsync invocations
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Remote port, ssh's default when unset
    pub port: Option<u16>,
    /// SSH key path
    pub key_path: Option<PathBuf>,
    /// Extra `-o key=value` options
    pub options: HashMap<String, String>,
    /// Connection timeout in seconds
    pub connect_timeout: Option<u64>,
}

impl SshConfig {
    /// Options for `ssh` (and rsync's `-e ssh ...`)
    pub fn ssh_args(&self) -> Vec<String> {
        self.build_args("-p")
    }

    /// Options for `scp`, which spells the port flag differently
    pub fn scp_args(&self) -> Vec<String> {
        self.build_args("-P")
    }

    fn build_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];

        if let Some(timeout) = self.connect_timeout {
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={}", timeout));
        }

        if let Some(port) = self.port {
            args.push(port_flag.to_string());
            args.push(port.to_string());
        }

        if let Some(key_path) = &self.key_path {
            args.push("-i".to_string());
            args.push(key_path.to_string_lossy().to_string());
        }

        let mut options: Vec<_> = self.options.iter().collect();
        options.sort();
        for (key, value) in options {
            args.push("-o".to_string());
            args.push(format!("{}={}", key, value));
        }

        args
    }
}

/// Transport that runs real local subprocesses
#[derive(Debug, Clone, Default)]
pub struct ProcessTransport;

impl ProcessTransport {
    /// Create a process transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn execute(&self, command: &CommandSpec) -> Result<String, TransportError> {
        debug!("Executing: {}", command);

        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TransportError::Launch {
                command: command.to_shell_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(TransportError::CommandFailed {
                command: command.to_shell_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn spawn(&self, command: &CommandSpec) -> Result<Connection, TransportError> {
        debug!("Spawning: {}", command);

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Launch {
                command: command.to_shell_string(),
                source,
            })?;

        Connection::from_child(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_config_default() {
        let config = SshConfig::default();
        assert_eq!(config.ssh_args(), vec!["-o", "BatchMode=yes"]);
    }

    #[test]
    fn test_ssh_args_building() {
        let mut config = SshConfig {
            port: Some(2222),
            key_path: Some(PathBuf::from("/path/to/key")),
            connect_timeout: Some(15),
            ..Default::default()
        };
        config.options.insert("ServerAliveInterval".to_string(), "60".to_string());

        let args = config.ssh_args();
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/path/to/key"]));
        assert!(args.windows(2).any(|w| w == ["-o", "ServerAliveInterval=60"]));
        assert!(args.windows(2).any(|w| w == ["-o", "ConnectTimeout=15"]));
    }

    #[test]
    fn test_scp_uses_capital_port_flag() {
        let config = SshConfig {
            port: Some(2222),
            ..Default::default()
        };
        let args = config.scp_args();
        assert!(args.windows(2).any(|w| w == ["-P", "2222"]));
        assert!(!args.contains(&"-p".to_string()));
    }

    #[tokio::test]
    async fn test_execute_captures_stdout() {
        let transport = ProcessTransport::new();
        let output = transport
            .execute(&CommandSpec::new("echo").arg("connection_test"))
            .await
            .unwrap();
        assert_eq!(output.trim(), "connection_test");
    }

    #[tokio::test]
    async fn test_execute_reports_failed_command() {
        let transport = ProcessTransport::new();
        let err = transport
            .execute(&CommandSpec::new("sh").args(["-c", "echo oops >&2; exit 3"]))
            .await
            .unwrap_err();

        match err {
            TransportError::CommandFailed { code, stderr, command } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "oops");
                assert!(command.starts_with("sh -c "));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let transport = ProcessTransport::new();
        let err = transport
            .execute(&CommandSpec::new("/nonexistent/livesync-test-binary"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Launch { .. }));
    }
}
