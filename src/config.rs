//! Device identity and local path configuration.
//!
//! The tablet is always reachable at the same USB-network address, so the
//! target identity is a set of constants. Everything else in the crate takes a
//! [`DeviceTarget`] (and the path structs) by reference instead of reading
//! these constants directly.
//!
//! # Example
//!
//! ```rust
//! use remarkable_setup::config::DeviceTarget;
//!
//! let target = DeviceTarget::remarkable();
//! assert_eq!(target.alias, "reMarkable");
//! assert_eq!(target.destination(), "root@10.11.99.1");
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Address of the tablet on its USB network interface.
pub const DEVICE_ADDRESS: &str = "10.11.99.1";
/// Host alias written to the user's SSH config.
pub const DEVICE_ALIAS: &str = "reMarkable";
/// Login user on the tablet.
pub const DEVICE_USER: &str = "root";
/// SSH port on the tablet.
pub const DEVICE_PORT: u16 = 22;

/// Conventional key names, in priority order.
pub const DEFAULT_KEY_NAMES: &[&str] = &["id_ed25519", "id_rsa"];
/// Key type used when no usable keypair exists.
pub const GENERATED_KEY_TYPE: &str = "ed25519";
/// File name of a freshly generated key.
pub const GENERATED_KEY_NAME: &str = "id_ed25519";

/// Timeout handed to `ssh-keyscan -T`.
pub const KEYSCAN_TIMEOUT_SECS: u64 = 5;
/// `ConnectTimeout` for non-interactive access checks.
pub const CONNECT_TIMEOUT_SECS: u64 = 5;
/// Timeout for the preflight TCP probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Remote location of the font.
pub const REMOTE_FONT: &str = "/usr/share/fonts/MaruBuri-Regular.otf";
/// Remote location of the sleep screen image.
pub const REMOTE_IMAGE: &str = "/usr/share/remarkable/suspended.png";
/// Local font file name inside the assets directory.
pub const LOCAL_FONT_NAME: &str = "MaruBuri-Regular.otf";
/// Local image file name inside the assets directory.
pub const LOCAL_IMAGE_NAME: &str = "suspended.png";

/// Identity of the device being provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub address: String,
    pub alias: String,
    pub username: String,
}

impl DeviceTarget {
    /// The reMarkable tablet on its default USB address.
    pub fn remarkable() -> Self {
        Self {
            address: DEVICE_ADDRESS.to_string(),
            alias: DEVICE_ALIAS.to_string(),
            username: DEVICE_USER.to_string(),
        }
    }

    /// `user@address`, bypassing any alias.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }

    /// `user@alias`.
    pub fn alias_destination(&self) -> String {
        format!("{}@{}", self.username, self.alias)
    }

    /// Names under which stale host keys may be recorded in `known_hosts`.
    pub fn known_host_names(&self) -> Vec<String> {
        vec![
            self.address.clone(),
            format!("[{}]:{}", self.address, DEVICE_PORT),
            self.alias.clone(),
        ]
    }
}

/// Local SSH files touched by the bootstrap.
#[derive(Debug, Clone)]
pub struct SshPaths {
    pub ssh_dir: PathBuf,
    pub known_hosts: PathBuf,
    pub config: PathBuf,
    pub config_backup: PathBuf,
}

impl SshPaths {
    /// Paths inside an explicit SSH directory.
    ///
    /// The directory is made absolute so `IdentityFile` entries written to the
    /// config never depend on the working directory.
    pub fn new(ssh_dir: &Path) -> Result<Self> {
        let ssh_dir = std::path::absolute(ssh_dir)
            .with_context(|| format!("Cannot resolve SSH directory: {}", ssh_dir.display()))?;
        Ok(Self {
            known_hosts: ssh_dir.join("known_hosts"),
            config: ssh_dir.join("config"),
            config_backup: ssh_dir.join("config.bak"),
            ssh_dir,
        })
    }

    /// `~/.ssh` of the current user.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().context("Cannot determine home directory")?;
        Self::new(&home.join(".ssh"))
    }
}

/// Local asset files pushed to the device.
#[derive(Debug, Clone)]
pub struct AssetPaths {
    pub font: PathBuf,
    pub image: PathBuf,
}

impl AssetPaths {
    pub fn new(assets_dir: &Path) -> Self {
        Self {
            font: assets_dir.join(LOCAL_FONT_NAME),
            image: assets_dir.join(LOCAL_IMAGE_NAME),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remarkable_target() {
        let target = DeviceTarget::remarkable();

        assert_eq!(target.address, "10.11.99.1");
        assert_eq!(target.alias, "reMarkable");
        assert_eq!(target.username, "root");
        assert_eq!(target.alias_destination(), "root@reMarkable");
    }

    #[test]
    fn test_known_host_names_include_port_form() {
        let names = DeviceTarget::remarkable().known_host_names();
        assert_eq!(names, vec!["10.11.99.1", "[10.11.99.1]:22", "reMarkable"]);
    }

    #[test]
    fn test_ssh_paths_are_absolute() -> Result<()> {
        let paths = SshPaths::new(Path::new("relative/.ssh"))?;

        assert!(paths.ssh_dir.is_absolute());
        assert!(paths.config.ends_with("relative/.ssh/config"));
        assert!(paths.config_backup.ends_with("relative/.ssh/config.bak"));
        Ok(())
    }
}
