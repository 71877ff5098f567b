//! Destination and options for `ssh` / `scp` invocations.
//!
//! Every invocation names the `known_hosts` file the bootstrap maintains, so
//! host keys are checked against the same file that was just refreshed, even
//! when the SSH directory is not `~/.ssh`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{DeviceTarget, SshPaths, CONNECT_TIMEOUT_SECS};
use crate::process::{Cmd, Runner};

use super::config_file::quote_value;
use super::keys::KeyPair;

/// How to reach the device: `user@host` plus `-F` / `-o` options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    destination: String,
    /// Config file passed with `-F`; only needed to resolve the alias.
    config: Option<PathBuf>,
    options: Vec<String>,
}

impl Connection {
    /// Through the `Host` alias written by the bootstrap. Never prompts.
    pub fn alias(target: &DeviceTarget, paths: &SshPaths) -> Self {
        Self {
            destination: target.alias_destination(),
            config: Some(paths.config.clone()),
            options: vec![
                "BatchMode=yes".to_string(),
                path_option("UserKnownHostsFile", &paths.known_hosts),
            ],
        }
    }

    /// Straight to the device address, with whatever auth ssh finds.
    ///
    /// May prompt for a password.
    pub fn direct(target: &DeviceTarget, paths: &SshPaths) -> Self {
        Self {
            destination: target.destination(),
            config: None,
            options: vec![
                "StrictHostKeyChecking=yes".to_string(),
                path_option("UserKnownHostsFile", &paths.known_hosts),
                format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS),
            ],
        }
    }

    /// Key-only, non-interactive login to the device address.
    pub fn key_only(target: &DeviceTarget, paths: &SshPaths, key: &KeyPair) -> Self {
        Self {
            destination: target.destination(),
            config: None,
            options: vec![
                "StrictHostKeyChecking=yes".to_string(),
                path_option("UserKnownHostsFile", &paths.known_hosts),
                path_option("IdentityFile", &key.private),
                "IdentitiesOnly=yes".to_string(),
                "BatchMode=yes".to_string(),
                "PreferredAuthentications=publickey".to_string(),
                format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS),
            ],
        }
    }

    /// Use the alias when `ssh -F <config> -G` maps it to the device address,
    /// else go direct.
    pub fn resolve(runner: &dyn Runner, target: &DeviceTarget, paths: &SshPaths) -> Self {
        let resolved = Cmd::new("ssh")
            .arg("-F")
            .arg_path(&paths.config)
            .arg("-G")
            .arg(&target.alias)
            .allow_fail()
            .run(runner)
            .ok()
            .filter(|r| r.success())
            .map(|r| alias_points_at(&r.stdout, &target.address))
            .unwrap_or(false);

        debug!(alias = %target.alias, config = %paths.config.display(), resolved, "alias lookup");
        if resolved {
            Self::alias(target, paths)
        } else {
            Self::direct(target, paths)
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// `ssh [-F config] [opts] dest <remote_command>`.
    pub fn ssh(&self, remote_command: &str) -> Cmd {
        self.with_options(Cmd::new("ssh"))
            .arg(&self.destination)
            .arg(remote_command)
    }

    /// `scp -O [-F config] [opts] <local> dest:<remote>`.
    ///
    /// `-O` forces the legacy protocol; the device ships no sftp-server.
    pub fn scp(&self, local: &Path, remote: &str) -> Cmd {
        self.with_options(Cmd::new("scp").arg("-O"))
            .arg_path(local)
            .arg(format!("{}:{}", self.destination, remote))
    }

    fn with_options(&self, cmd: Cmd) -> Cmd {
        let cmd = match &self.config {
            Some(config) => cmd.arg("-F").arg_path(config),
            None => cmd,
        };
        cmd.args(self.options.iter().flat_map(|o| ["-o", o.as_str()]))
    }
}

/// `Keyword=value` with the path quoted when it contains whitespace.
fn path_option(keyword: &str, path: &Path) -> String {
    format!("{}={}", keyword, quote_value(&path.display().to_string()))
}

/// Whether `ssh -G` output resolves to `address`.
fn alias_points_at(ssh_g_output: &str, address: &str) -> bool {
    ssh_g_output.lines().any(|line| {
        let mut parts = line.split_whitespace();
        parts.next() == Some("hostname") && parts.next() == Some(address)
    })
}
