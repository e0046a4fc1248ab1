//! Settings file and per-host configuration

use crate::{LivesyncError, Result, SessionConfig};
use livesync_ssh::{BootstrapConfig, SshConfig};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_retry_interval_secs() -> u64 {
    10
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Top-level settings file
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Local tree to replicate
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Directory holding prebuilt `livesync-<os>-<arch>` daemons
    #[serde(default)]
    pub binaries_dir: PathBuf,
    /// Pause between a fault and the next attempt
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Verbose logging here and `--debug` on the daemons
    #[serde(default)]
    pub debug: bool,
    /// Remote hosts, one session each
    pub hosts: Vec<HostConfig>,
}

/// One remote host
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Host as given to ssh, e.g. `user@example.com`
    pub host: String,
    /// Remote working directory
    pub dir: String,
    /// Path patterns left out of replication
    #[serde(default)]
    pub excludes: BTreeSet<String>,
    /// Run remote commands as this user through sudo
    #[serde(default)]
    pub sudo_user: Option<String>,
    /// Remote daemon path to use as-is
    #[serde(default)]
    pub remote_bin_path: Option<String>,
    /// Reconnect when more than this many bytes are queued; 0 disables
    #[serde(default)]
    pub send_queue_limit: u64,
    /// SSH options for this host
    #[serde(default)]
    pub ssh: SshConfig,
}

impl Settings {
    /// Read and validate a JSON settings file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse and validate settings from a JSON string
    pub fn from_json(raw: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(LivesyncError::Config("No hosts configured".to_string()));
        }
        for host in &self.hosts {
            if host.host.trim().is_empty() {
                return Err(LivesyncError::Config("Empty host name".to_string()));
            }
            if host.dir.trim().is_empty() {
                return Err(LivesyncError::Config(format!(
                    "Empty remote directory for {}",
                    host.host
                )));
            }
        }
        Ok(())
    }

    /// Interval between attempts
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// One session configuration per host
    pub fn session_configs(&self) -> Vec<SessionConfig> {
        self.hosts
            .iter()
            .map(|host| SessionConfig {
                bootstrap: BootstrapConfig {
                    host: host.host.clone(),
                    dir: host.dir.clone(),
                    source_dir: self.source_dir.clone(),
                    excludes: host.excludes.clone(),
                    sudo_user: host.sudo_user.clone(),
                    remote_bin_path: host.remote_bin_path.clone(),
                    ssh: host.ssh.clone(),
                    debug: self.debug,
                },
                send_queue_limit: host.send_queue_limit,
                retry_interval: self.retry_interval(),
            })
            .collect()
    }
}
