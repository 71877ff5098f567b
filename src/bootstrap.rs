//! Passwordless SSH bootstrap.
//!
//! # Flow
//!
//! ```text
//! 1. Refresh known_hosts entries for the device
//! 2. Select (or generate) a keypair
//! 3. Key-only login works?  ── yes ──────────────┐
//!        │ no                                     │
//! 4. Install the key (password prompt)            │
//!    Key-only login works now? ── no → abort      │
//!        │ yes                                    │
//! 5. Write the Host alias block  ◄────────────────┘
//! ```
//!
//! Every step re-checks state before acting, so an interrupted run can simply
//! be started again.

use anyhow::{Context, Result};

use tracing::info;

use crate::config::{DeviceTarget, SshPaths};
use crate::error::SetupError;
use crate::process::Runner;
use crate::ssh::{
    check_passwordless, ensure_alias, install_key, refresh_known_hosts, select_or_create,
    AliasUpdate, Connection, KeyPair,
};

/// What a successful bootstrap did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub key: KeyPair,
    /// The key had to be installed on the device during this run.
    pub key_installed: bool,
    pub alias: AliasUpdate,
}

/// Sequences the bootstrap steps for one device.
pub struct Bootstrap<'a> {
    runner: &'a dyn Runner,
    target: &'a DeviceTarget,
    paths: &'a SshPaths,
}

impl<'a> Bootstrap<'a> {
    pub fn new(runner: &'a dyn Runner, target: &'a DeviceTarget, paths: &'a SshPaths) -> Self {
        Self {
            runner,
            target,
            paths,
        }
    }

    /// Make key-only login work and record the alias.
    ///
    /// Fails with [`SetupError::InstallFailed`] when the key cannot be
    /// installed, or [`SetupError::StillNotPasswordless`] when it was installed
    /// but key-only login is still refused. The alias block is only written
    /// once passwordless access is confirmed.
    pub fn ensure_passwordless(&self) -> Result<BootstrapReport> {
        println!("Refreshing host keys for {}...", self.target.address);
        let recorded = refresh_known_hosts(self.runner, self.target, self.paths)
            .context("Failed to refresh known_hosts")?;
        if recorded == 0 {
            println!("  [WARN] No host keys received (is the tablet connected?)");
        }

        let key = select_or_create(self.runner, self.paths)?;
        println!("  Key: {}", key.private.display());

        let mut key_installed = false;
        if check_passwordless(self.runner, self.target, self.paths, &key).success {
            println!("[SKIP] Passwordless SSH already works");
        } else {
            println!("Installing public key on {}...", self.target.destination());
            println!("  Enter the device root password if asked");
            println!("  (Settings > Help > Copyrights and licenses on the tablet)");
            install_key(self.runner, self.target, self.paths, &key)?;
            key_installed = true;

            let outcome = check_passwordless(self.runner, self.target, self.paths, &key);
            if !outcome.success {
                return Err(SetupError::StillNotPasswordless {
                    destination: self.target.destination(),
                    transcript: outcome.transcript,
                }
                .into());
            }
            println!("[OK] Passwordless SSH confirmed");
        }

        let alias = ensure_alias(self.target, &key, self.paths)
            .context("Failed to update SSH config")?;
        let config = self.paths.config.display();
        match alias {
            AliasUpdate::Unchanged => {
                println!("[SKIP] Host {} already configured", self.target.alias)
            }
            AliasUpdate::Replaced => println!("[OK] Updated Host {} in {}", self.target.alias, config),
            AliasUpdate::Appended => println!("[OK] Added Host {} to {}", self.target.alias, config),
        }

        info!(key = %key.private.display(), key_installed, ?alias, "bootstrap complete");
        Ok(BootstrapReport {
            key,
            key_installed,
            alias,
        })
    }

    /// Connection to use once the bootstrap has succeeded.
    pub fn connection(&self) -> Connection {
        Connection::alias(self.target, self.paths)
    }
}
