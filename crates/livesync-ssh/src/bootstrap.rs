//! Remote daemon bootstrap
//!
//! One attempt runs four blocking steps in order: full rsync of the source
//! tree, a single discovery command on the remote host, the decision whether
//! a daemon binary has to be copied over, and the launch of the daemon whose
//! stdin/stdout become the session's transport. Any failure aborts the
//! attempt; retrying is the supervisor's job.

use crate::command::join;
use crate::sync::SyncCommand;
use crate::{CommandSpec, Connection, SshConfig, Transport, TransportError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Hidden directory under the remote working directory
pub const REMOTE_STAGING_DIR: &str = ".livesync";

/// Daemon binary name, both in the staging directory and on `PATH`
pub const REMOTE_BINARY: &str = "livesync";

/// Everything bootstrap needs to know about one host
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Remote host, as given to ssh
    pub host: String,
    /// Remote working directory
    pub dir: String,
    /// Local tree mirrored onto `dir`
    pub source_dir: PathBuf,
    /// Path patterns excluded from sync and from the daemon's watch
    pub excludes: BTreeSet<String>,
    /// Run remote commands as this user through sudo
    pub sudo_user: Option<String>,
    /// Use this remote daemon path as-is, skipping discovery-based deployment
    pub remote_bin_path: Option<String>,
    /// SSH options
    pub ssh: SshConfig,
    /// Start the daemon with `--debug`
    pub debug: bool,
}

impl BootstrapConfig {
    /// Remote staging directory
    pub fn staging_dir(&self) -> String {
        format!("{}/{}", self.dir.trim_end_matches('/'), REMOTE_STAGING_DIR)
    }

    /// Remote path a deployed daemon binary is copied to
    pub fn staged_binary(&self) -> String {
        format!("{}/{}", self.staging_dir(), REMOTE_BINARY)
    }
}

/// What the remote host reported about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResult {
    /// Lowercased OS name (`uname`)
    pub os: String,
    /// Architecture (`uname -m`)
    pub arch: String,
    /// Daemon found on the remote `PATH`, empty if none
    pub binary_path: String,
    /// Version reported by that daemon, empty if unknown
    pub version: String,
}

impl DiscoveryResult {
    /// Parse the four newline-separated fields printed by the discovery command
    pub fn parse(host: &str, output: &str) -> Result<Self, TransportError> {
        let body = output.strip_suffix('\n').unwrap_or(output);
        let lines: Vec<&str> = body.split('\n').map(str::trim).collect();

        match lines.as_slice() {
            [os, arch, binary_path, version] => Ok(Self {
                os: os.to_lowercase(),
                arch: arch.to_string(),
                binary_path: binary_path.to_string(),
                version: version.to_string(),
            }),
            _ => Err(TransportError::Discovery {
                host: host.to_string(),
                lines: lines.len(),
            }),
        }
    }
}

/// Local prebuilt daemon binaries and the version check against them
pub trait BinaryCatalog: Send + Sync {
    /// Version of the local build
    fn local_version(&self) -> &str;

    /// Whether a remote daemon of `remote_version` can talk to this client
    fn is_compatible(&self, remote_version: &str) -> bool;

    /// Prebuilt binary for the given platform
    fn locate(&self, os: &str, arch: &str) -> Result<PathBuf, TransportError>;
}

/// Prebuilt binaries named `livesync-<os>-<arch>` in one local directory
#[derive(Debug, Clone)]
pub struct LocalBinaries {
    dir: PathBuf,
    version: String,
}

impl LocalBinaries {
    /// Look for prebuilt binaries in `dir`; `version` is the local version
    pub fn new(dir: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            version: version.into(),
        }
    }

    /// Path the binary for a platform is expected at
    pub fn binary_path(&self, os: &str, arch: &str) -> PathBuf {
        self.dir.join(format!("{}-{}-{}", REMOTE_BINARY, os, arch))
    }
}

/// `major.minor` of a version string, ignoring a leading `v`
fn major_minor(version: &str) -> Option<(&str, &str)> {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    let mut parts = version.split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) if !major.is_empty() && !minor.is_empty() => Some((major, minor)),
        _ => None,
    }
}

impl BinaryCatalog for LocalBinaries {
    fn local_version(&self) -> &str {
        &self.version
    }

    fn is_compatible(&self, remote_version: &str) -> bool {
        match (major_minor(remote_version), major_minor(&self.version)) {
            (Some(remote), Some(local)) => remote == local,
            _ => false,
        }
    }

    fn locate(&self, os: &str, arch: &str) -> Result<PathBuf, TransportError> {
        let path = self.binary_path(os, arch);
        if path.is_file() {
            Ok(path)
        } else {
            Err(TransportError::MissingBinary { path })
        }
    }
}

/// One bootstrap attempt against one host
pub struct Bootstrap<'a, T: ?Sized> {
    transport: &'a T,
    config: &'a BootstrapConfig,
    catalog: &'a dyn BinaryCatalog,
}

impl<'a, T> Bootstrap<'a, T>
where
    T: Transport + ?Sized,
{
    /// Prepare a bootstrap attempt
    pub fn new(transport: &'a T, config: &'a BootstrapConfig, catalog: &'a dyn BinaryCatalog) -> Self {
        Self {
            transport,
            config,
            catalog,
        }
    }

    /// Sync, discover, deploy if needed, and launch the daemon
    pub async fn run(&self) -> Result<Connection, TransportError> {
        self.full_sync().await?;
        let discovery = self.discover().await?;
        let binary = self.resolve_binary(&discovery).await?;
        self.launch(&binary).await
    }

    /// Rsync invocation mirroring the source tree
    pub fn sync_command(&self) -> CommandSpec {
        SyncCommand {
            source_dir: &self.config.source_dir,
            host: &self.config.host,
            dir: &self.config.dir,
            excludes: &self.config.excludes,
            sudo_user: self.config.sudo_user.as_deref(),
            ssh: &self.config.ssh,
        }
        .build()
    }

    /// Mirror the local tree onto the remote directory, deleting extra files
    pub async fn full_sync(&self) -> Result<(), TransportError> {
        info!("Initial file sync using rsync at {}...", self.config.host);

        let command = self.sync_command();
        match self.transport.execute(&command).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let command = command.to_shell_string();
                error!(
                    "Cannot perform initial sync. Please ensure that you can execute the following command:\n{}",
                    command
                );
                if let TransportError::CommandFailed { stderr, .. } = &e {
                    debug!("rsync stderr:\n{}", stderr);
                } else {
                    debug!("rsync error: {}", e);
                }
                Err(TransportError::Sync { command })
            }
        }
    }

    /// Remote script: staging dir, stale binary removal, platform and daemon report
    ///
    /// The remote directory goes in as written so the remote shell expands
    /// `~` and variables in it.
    pub fn discovery_script(&self) -> String {
        format!(
            "if [ ! -d {dir} ]; then mkdir -m a=rwx -p {dir}; fi; \
             rm -f {staged} && uname && uname -m && \
             if BIN=$(command -v {name} 2>/dev/null); then \
             echo \"$BIN\"; VERSION=$(\"$BIN\" --version 2>/dev/null | head -n 1); echo \"$VERSION\"; \
             else echo; echo; fi",
            dir = self.config.staging_dir(),
            staged = self.config.staged_binary(),
            name = REMOTE_BINARY,
        )
    }

    /// Ssh invocation running the discovery script
    pub fn discovery_command(&self) -> CommandSpec {
        CommandSpec::new("ssh")
            .args(self.config.ssh.ssh_args())
            .arg(self.config.host.as_str())
            .arg(self.discovery_script())
    }

    /// Prepare the staging directory and report platform and existing daemon
    pub async fn discover(&self) -> Result<DiscoveryResult, TransportError> {
        info!("Creating directories at {}...", self.config.host);

        let output = self.transport.execute(&self.discovery_command()).await?;
        let discovery = DiscoveryResult::parse(&self.config.host, &output)?;

        info!(
            "Discovered ostype:{} osarch:{} binary:{} version:{} at {}",
            discovery.os, discovery.arch, discovery.binary_path, discovery.version, self.config.host
        );
        Ok(discovery)
    }

    /// Pick the remote daemon path, copying a prebuilt binary over if needed
    pub async fn resolve_binary(&self, discovery: &DiscoveryResult) -> Result<String, TransportError> {
        if let Some(path) = &self.config.remote_bin_path {
            return Ok(path.clone());
        }

        if !discovery.binary_path.is_empty() {
            if self.catalog.is_compatible(&discovery.version) {
                return Ok(discovery.binary_path.clone());
            }
            info!(
                "Remote {} version {:?} at {} is not compatible with local version {}",
                REMOTE_BINARY,
                discovery.version,
                self.config.host,
                self.catalog.local_version()
            );
        }

        let local = match self.catalog.locate(&discovery.os, &discovery.arch) {
            Ok(local) => local,
            Err(e) => {
                error!(
                    "{}. Cannot find compatible {} on remote and local hosts",
                    e, REMOTE_BINARY
                );
                return Err(e);
            }
        };
        self.deploy(&local).await?;
        Ok(self.config.staged_binary())
    }

    /// Scp invocation copying a local binary to the staging path
    pub fn deploy_command(&self, local: &Path) -> CommandSpec {
        CommandSpec::new("scp")
            .args(self.config.ssh.scp_args())
            .arg(local.to_string_lossy())
            .arg(format!("{}:{}", self.config.host, self.config.staged_binary()))
    }

    /// Copy a local prebuilt daemon to the remote staging path
    pub async fn deploy(&self, local: &Path) -> Result<(), TransportError> {
        info!(
            "Copying {} binary {} to {}",
            REMOTE_BINARY,
            local.display(),
            self.config.host
        );
        self.transport.execute(&self.deploy_command(local)).await?;
        Ok(())
    }

    /// Remote command line starting the daemon in server mode
    ///
    /// `binary` and the remote directory are left for the remote shell to
    /// expand; the sudo user, host name and excludes are quoted.
    pub fn launch_script(&self, binary: &str) -> String {
        let hostname = format!("--hostname={}", self.config.host);
        let mut flags: Vec<&str> = vec!["--server", hostname.as_str()];
        if self.config.debug {
            flags.push("--debug");
        }
        for pattern in &self.config.excludes {
            flags.push("--exclude");
            flags.push(pattern);
        }

        let sudo = match &self.config.sudo_user {
            Some(user) => format!("{} ", join(["sudo", "-u", user.as_str()])),
            None => String::new(),
        };
        format!("{}{} {} {}", sudo, binary, join(flags), self.config.dir)
    }

    /// Ssh invocation starting the daemon
    pub fn launch_command(&self, binary: &str) -> CommandSpec {
        CommandSpec::new("ssh")
            .args(self.config.ssh.ssh_args())
            .arg(self.config.host.as_str())
            .arg(self.launch_script(binary))
    }

    /// Start the daemon; its stdin/stdout become the session transport
    pub async fn launch(&self, binary: &str) -> Result<Connection, TransportError> {
        info!("Launching {} at {}...", REMOTE_BINARY, self.config.host);

        let command = self.launch_command(binary);
        debug!("Launch command: {}", command);
        self.transport.spawn(&command).await
    }
}
