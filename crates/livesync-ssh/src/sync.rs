//! Full-tree rsync invocation

use crate::{CommandSpec, SshConfig};
use std::collections::BTreeSet;
use std::path::Path;

/// Mirror of the local source tree onto the remote working directory
#[derive(Debug, Clone)]
pub struct SyncCommand<'a> {
    /// Local tree to mirror
    pub source_dir: &'a Path,
    /// Remote host, as given to ssh
    pub host: &'a str,
    /// Remote working directory
    pub dir: &'a str,
    /// Path patterns left out of the mirror
    pub excludes: &'a BTreeSet<String>,
    /// Run remote rsync as this user through sudo
    pub sudo_user: Option<&'a str>,
    /// SSH options for the `-e` transport
    pub ssh: &'a SshConfig,
}

impl SyncCommand<'_> {
    /// Build `rsync -e "ssh ..." --exclude=... -a --delete src/ host:dir/`
    pub fn build(&self) -> CommandSpec {
        let mut ssh = vec!["ssh".to_string()];
        ssh.extend(self.ssh.ssh_args());

        let mut cmd = CommandSpec::new("rsync")
            .arg("-e")
            .arg(crate::command::join(ssh.iter().map(String::as_str)));

        for pattern in self.excludes {
            cmd = cmd.arg(format!("--exclude={}", pattern));
        }

        if let Some(user) = self.sudo_user {
            cmd = cmd
                .arg("--rsync-path")
                .arg(crate::command::join(["sudo", "-u", user, "rsync"]));
        }

        let source = self.source_dir.to_string_lossy();
        cmd.args([
            "-a".to_string(),
            "--delete".to_string(),
            format!("{}/", source.trim_end_matches('/')),
            format!("{}:{}/", self.host, self.dir.trim_end_matches('/')),
        ])
    }
}
