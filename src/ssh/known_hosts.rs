//! Known-hosts reconciliation.
//!
//! The tablet regenerates its host key on every OS update, so an old entry in
//! `known_hosts` would make strict host-key checking reject it. Before each run
//! every entry for the device is dropped and fresh keys are scanned in.
//!
//! Nothing in here is fatal. A host that was never recorded, or a scan that
//! returns nothing because the device is offline, is just skipped; the access
//! check further down will report the connectivity problem.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::{DeviceTarget, SshPaths, KEYSCAN_TIMEOUT_SECS};
use crate::process::{Cmd, Runner};

use super::ensure_ssh_dir;

/// Purge stale entries for `target` and append freshly scanned ones.
///
/// Returns the number of host names for which key material was recorded.
pub fn refresh_known_hosts(
    runner: &dyn Runner,
    target: &DeviceTarget,
    paths: &SshPaths,
) -> Result<usize> {
    ensure_ssh_dir(&paths.ssh_dir)?;

    if paths.known_hosts.exists() {
        for name in target.known_host_names() {
            forget_host(runner, &paths.known_hosts, &name);
        }
    }

    let mut recorded = 0;
    for host in [&target.address, &target.alias] {
        let entries = scan_host(runner, host);
        if entries.trim().is_empty() {
            debug!(host = %host, "no host keys returned, skipping");
            continue;
        }
        append_entries(&paths.known_hosts, &entries)?;
        recorded += 1;
    }

    Ok(recorded)
}

/// `ssh-keygen -R`. A missing entry is not an error.
fn forget_host(runner: &dyn Runner, known_hosts: &Path, name: &str) {
    let result = Cmd::new("ssh-keygen")
        .arg("-f")
        .arg_path(known_hosts)
        .args(["-R", name])
        .allow_fail()
        .run(runner);

    match result {
        Ok(r) if r.success() => debug!(host = %name, "removed known_hosts entries"),
        Ok(r) => debug!(host = %name, code = ?r.code, "no known_hosts entry to remove"),
        Err(e) => warn!(host = %name, "ssh-keygen -R failed: {e:#}"),
    }
}

/// `ssh-keyscan -H`, returning whatever key lines it printed.
fn scan_host(runner: &dyn Runner, host: &str) -> String {
    let result = Cmd::new("ssh-keyscan")
        .args(["-H", "-T"])
        .arg(KEYSCAN_TIMEOUT_SECS.to_string())
        .arg(host)
        .allow_fail()
        .run(runner);

    match result {
        Ok(r) => r.stdout,
        Err(e) => {
            warn!(host = %host, "ssh-keyscan failed: {e:#}");
            String::new()
        }
    }
}

fn append_entries(known_hosts: &Path, entries: &str) -> Result<()> {
    let needs_separator = fs::read(known_hosts)
        .map(|bytes| !bytes.is_empty() && !bytes.ends_with(b"\n"))
        .unwrap_or(false);

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(known_hosts)
        .with_context(|| format!("Failed to open {}", known_hosts.display()))?;

    if needs_separator {
        file.write_all(b"\n")?;
    }
    file.write_all(entries.as_bytes())?;
    if !entries.ends_with('\n') {
        file.write_all(b"\n")?;
    }

    Ok(())
}
