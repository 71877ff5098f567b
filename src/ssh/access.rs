//! Passwordless access check and key installation.

use anyhow::Result;

use tracing::{debug, warn};

use crate::config::{DeviceTarget, SshPaths};
use crate::error::{SetupError, Transcript};
use crate::process::Runner;

use super::connection::Connection;
use super::keys::KeyPair;

/// Text the access check expects to see echoed back.
pub const CONNECTED_MARKER: &str = "Connected";

/// Appends stdin to `~/.ssh/authorized_keys` with owner-only permissions.
const INSTALL_COMMAND: &str = "umask 077; mkdir -p ~/.ssh && touch ~/.ssh/authorized_keys \
     && cat >> ~/.ssh/authorized_keys && chmod 700 ~/.ssh && chmod 600 ~/.ssh/authorized_keys";

/// Result of one access attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOutcome {
    pub success: bool,
    pub transcript: Transcript,
}

/// Whether key-only login to the device works right now.
///
/// Never fails: timeouts, refused auth and missing output all just mean
/// "not passwordless yet".
pub fn check_passwordless(
    runner: &dyn Runner,
    target: &DeviceTarget,
    paths: &SshPaths,
    key: &KeyPair,
) -> ConnectionOutcome {
    let result = Connection::key_only(target, paths, key)
        .ssh(&format!("echo {}", CONNECTED_MARKER))
        .allow_fail()
        .run(runner);

    match result {
        Ok(r) => {
            let success = r.success() && r.stdout.contains(CONNECTED_MARKER);
            debug!(code = ?r.code, success, "passwordless check");
            ConnectionOutcome {
                success,
                transcript: r.transcript(),
            }
        }
        Err(e) => {
            warn!("passwordless check could not run: {e:#}");
            ConnectionOutcome {
                success: false,
                transcript: Transcript {
                    stdout: String::new(),
                    stderr: format!("{e:#}"),
                },
            }
        }
    }
}

/// Append the public key to the device's `authorized_keys`.
///
/// Uses whatever authentication ssh has available, which normally means the
/// device password typed at the terminal.
pub fn install_key(
    runner: &dyn Runner,
    target: &DeviceTarget,
    paths: &SshPaths,
    key: &KeyPair,
) -> Result<()> {
    let public_key = key.public_key_line()?;
    let conn = Connection::direct(target, paths);

    let result = conn
        .ssh(INSTALL_COMMAND)
        .stdin(public_key)
        .allow_fail()
        .run(runner);

    let transcript = match result {
        Ok(r) if r.success() => return Ok(()),
        Ok(r) => r.transcript(),
        Err(e) => Transcript {
            stdout: String::new(),
            stderr: format!("{e:#}"),
        },
    };

    Err(SetupError::InstallFailed {
        destination: conn.destination().to_string(),
        transcript,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{failed, ok, ScriptedRunner};
    use crate::process::{Cmd, CommandResult};
    use std::fs;
    use std::io;
    use tempfile::TempDir;

    fn paths_in(dir: &TempDir) -> Result<SshPaths> {
        SshPaths::new(dir.path())
    }

    fn key_in(dir: &TempDir) -> Result<KeyPair> {
        let pair = KeyPair::for_private(&dir.path().join("id_ed25519"));
        fs::write(&pair.private, "PRIVATE\n")?;
        fs::write(&pair.public, "ssh-ed25519 AAAA me@laptop")?;
        Ok(pair)
    }

    #[test]
    fn test_check_requires_marker_and_zero_exit() -> Result<()> {
        let tmp = TempDir::new()?;
        let key = key_in(&tmp)?;
        let paths = paths_in(&tmp)?;
        let target = DeviceTarget::remarkable();

        let good = ScriptedRunner::new(|_| ok("Connected\n"));
        assert!(check_passwordless(&good, &target, &paths, &key).success);

        let no_marker = ScriptedRunner::new(|_| ok("Welcome!\n"));
        assert!(!check_passwordless(&no_marker, &target, &paths, &key).success);

        let denied = ScriptedRunner::new(|_| CommandResult {
            code: Some(255),
            stdout: "Connected".to_string(),
            stderr: "Permission denied (publickey).".to_string(),
        });
        let outcome = check_passwordless(&denied, &target, &paths, &key);
        assert!(!outcome.success);
        assert_eq!(outcome.transcript.stderr, "Permission denied (publickey).");
        Ok(())
    }

    #[test]
    fn test_check_tolerates_missing_ssh_binary() -> Result<()> {
        struct Broken;
        impl Runner for Broken {
            fn run(&self, _cmd: &Cmd) -> io::Result<CommandResult> {
                Err(io::Error::new(io::ErrorKind::NotFound, "ssh not found"))
            }
        }

        let tmp = TempDir::new()?;
        let outcome = check_passwordless(
            &Broken,
            &DeviceTarget::remarkable(),
            &paths_in(&tmp)?,
            &key_in(&tmp)?,
        );
        assert!(!outcome.success);
        assert!(outcome.transcript.stderr.contains("ssh not found"));
        Ok(())
    }

    #[test]
    fn test_install_pipes_key_with_single_newline() -> Result<()> {
        let tmp = TempDir::new()?;
        let key = key_in(&tmp)?;
        let runner = ScriptedRunner::succeeding();

        install_key(&runner, &DeviceTarget::remarkable(), &paths_in(&tmp)?, &key)?;

        let calls = runner.calls_to("ssh");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].stdin_data(), Some("ssh-ed25519 AAAA me@laptop\n"));
        assert!(!calls[0].has_arg("BatchMode=yes"));
        assert!(calls[0].has_arg("ConnectTimeout=5"));
        assert!(calls[0].has_arg("root@10.11.99.1"));
        assert!(calls[0].arg_strings().last().unwrap().contains("chmod 600"));
        Ok(())
    }

    #[test]
    fn test_install_failure_carries_transcript() -> Result<()> {
        let tmp = TempDir::new()?;
        let key = key_in(&tmp)?;
        let runner = ScriptedRunner::new(|_| failed(255, "Connection refused"));

        let err = install_key(&runner, &DeviceTarget::remarkable(), &paths_in(&tmp)?, &key)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Failed to install key on root@10.11.99.1"));
        assert!(msg.contains("STDERR: Connection refused"));
        Ok(())
    }
}
