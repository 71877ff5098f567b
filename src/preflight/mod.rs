//! Preflight checks before touching the device.
//!
//! # Checks Performed
//!
//! - **Host tools**: ssh, scp, ssh-keygen, ssh-keyscan are installed
//! - **Assets**: the font and sleep screen image exist locally
//! - **Network**: the tablet answers on its SSH port
//! - **Local state**: reports key, alias block and backup (informational)
//!
//! # Usage
//!
//! ```rust,ignore
//! use remarkable_setup::preflight::PreflightChecker;
//!
//! let checker = PreflightChecker::new(&target, &ssh_paths, &assets);
//! let report = checker.run_all().await?;
//!
//! report.print_summary();
//! if !report.is_ok() {
//!     std::process::exit(1);
//! }
//! ```

mod assets;
mod host_tools;
mod network;

pub use assets::check_assets;
pub use host_tools::{check_host_tools, require_host_tools};
pub use network::check_network;

use anyhow::Result;

use crate::config::{AssetPaths, DeviceTarget, SshPaths};
use crate::ssh::config_file::read_alias;
use crate::ssh::keys::find_existing;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Name of the check
    pub name: String,
    /// Whether the check passed
    pub passed: bool,
    /// Human-readable message
    pub message: String,
    /// Optional suggestion for fixing the issue
    pub suggestion: Option<String>,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Create a failing check result.
    pub fn fail(
        name: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

/// Comprehensive preflight report.
#[derive(Debug, Default)]
pub struct PreflightReport {
    /// All check results
    pub checks: Vec<CheckResult>,
    /// What the bootstrap has already set up locally
    pub local_state: LocalState,
}

impl PreflightReport {
    /// Check if all preflight checks passed.
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Get all failing checks.
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn total_count(&self) -> usize {
        self.checks.len()
    }

    /// Print a summary of the preflight checks.
    pub fn print_summary(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let status = if check.passed { "[OK]" } else { "[FAIL]" };
            println!("{} {}: {}", status, check.name, check.message);
            if let Some(suggestion) = &check.suggestion {
                println!("     Suggestion: {}", suggestion);
            }
        }

        println!();
        println!("=== Local SSH State ===\n");
        self.local_state.print();

        println!();
        if self.is_ok() {
            println!(
                "All preflight checks passed ({}/{})",
                self.passed_count(),
                self.total_count()
            );
        } else {
            println!(
                "Preflight checks failed: {} of {} passed",
                self.passed_count(),
                self.total_count()
            );
        }
    }
}

/// Local files the bootstrap creates or reuses.
#[derive(Debug, Default)]
pub struct LocalState {
    /// Keypair that would be used (none means one will be generated)
    pub key: Option<String>,
    /// `HostName` of the alias block, if the block exists
    pub alias_hostname: Option<String>,
    pub has_known_hosts: bool,
    pub has_config_backup: bool,
}

impl LocalState {
    /// Inspect the SSH directory without changing anything.
    pub fn inspect(target: &DeviceTarget, paths: &SshPaths) -> Result<Self> {
        let key = find_existing(&paths.ssh_dir)?.map(|k| k.private.display().to_string());
        let alias_hostname = read_alias(target, paths)?
            .map(|block| block.get("HostName").unwrap_or_default());

        Ok(Self {
            key,
            alias_hostname,
            has_known_hosts: paths.known_hosts.exists(),
            has_config_backup: paths.config_backup.exists(),
        })
    }

    pub fn print(&self) {
        let status = |b: bool| if b { "[present]" } else { "[missing]" };

        match &self.key {
            Some(key) => println!("[present]  Keypair ({})", key),
            None => println!("[missing]  Keypair (will be generated)"),
        }
        match &self.alias_hostname {
            Some(host) => println!("[present]  Host alias -> {}", host),
            None => println!("[missing]  Host alias"),
        }
        println!("{}  known_hosts", status(self.has_known_hosts));
        println!("{}  config.bak", status(self.has_config_backup));
    }
}

/// Preflight checker for one device.
pub struct PreflightChecker<'a> {
    target: &'a DeviceTarget,
    ssh_paths: &'a SshPaths,
    assets: &'a AssetPaths,
}

impl<'a> PreflightChecker<'a> {
    pub fn new(
        target: &'a DeviceTarget,
        ssh_paths: &'a SshPaths,
        assets: &'a AssetPaths,
    ) -> Self {
        Self {
            target,
            ssh_paths,
            assets,
        }
    }

    /// Run all preflight checks and return a comprehensive report.
    pub async fn run_all(&self) -> Result<PreflightReport> {
        let mut report = PreflightReport::default();

        report.checks.extend(check_host_tools());
        report.checks.extend(check_assets(self.assets));

        // Check network (async)
        report.checks.push(check_network(self.target).await);

        report.local_state = LocalState::inspect(self.target, self.ssh_paths)?;

        Ok(report)
    }
}
