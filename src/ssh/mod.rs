//! Passwordless SSH bootstrap building blocks.
//!
//! Each submodule owns one piece of local or remote SSH state:
//!
//! - `known_hosts`: purge stale host keys for the device and re-scan them
//! - `keys`: pick an existing keypair or generate one
//! - `access`: test key-only login, install the key when it fails
//! - `config_file`: keep a single `Host <alias>` block in `~/.ssh/config`
//! - `connection`: destination + options used for every `ssh`/`scp` call
//!
//! All of them shell out to the OpenSSH client tools through
//! [`crate::process::Runner`]; nothing here speaks the SSH protocol itself.

pub mod access;
pub mod config_file;
pub mod connection;
pub mod keys;
pub mod known_hosts;

pub use access::{check_passwordless, install_key, ConnectionOutcome};
pub use config_file::{ensure_alias, AliasUpdate, ConfigBlock, SshConfigDocument};
pub use connection::Connection;
pub use keys::{find_existing, select_or_create, KeyPair};
pub use known_hosts::refresh_known_hosts;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};

/// Create the local SSH directory with owner-only permissions if it is missing.
pub(crate) fn ensure_ssh_dir(ssh_dir: &Path) -> Result<()> {
    if ssh_dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(ssh_dir)
        .with_context(|| format!("Failed to create SSH directory: {}", ssh_dir.display()))?;
    fs::set_permissions(ssh_dir, fs::Permissions::from_mode(0o700))
        .with_context(|| format!("Failed to set permissions on {}", ssh_dir.display()))?;
    Ok(())
}
