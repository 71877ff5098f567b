//! Asset push - copies the font and sleep screen to the tablet and reboots it.
//!
//! The work is a fixed list of [`Step`]s run in order over an established
//! [`Connection`]. Whether a failed step aborts the run depends on the step:
//!
//! | Step                           | On failure              |
//! |--------------------------------|-------------------------|
//! | local asset missing            | abort before connecting |
//! | `echo ok`                      | [`OnFailure::Fatal`]    |
//! | remount `/` read-write         | [`OnFailure::Fatal`]    |
//! | copy a file                    | record, keep going      |
//! | chmod, mkdir, sync, remount ro | [`OnFailure::Warn`]     |
//! | fc-cache, reboot               | [`OnFailure::Ignore`]   |
//!
//! A fatal step that ssh itself could not complete (exit 255) is reported as
//! [`SetupError::ConnectionFailed`], any other exit status as
//! [`SetupError::RemoteCommandFailed`].
//!
//! Recorded copy failures turn into [`SetupError::CopyFailed`] after the last
//! step, so the device is still synced, remounted and rebooted.

use anyhow::{Context, Result};
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::config::{AssetPaths, REMOTE_FONT, REMOTE_IMAGE};
use crate::error::{SetupError, Transcript};
use crate::process::Runner;
use crate::ssh::Connection;

/// ssh's own exit status for connection and authentication errors.
const SSH_ERROR_EXIT: i32 = 255;

/// What to do when a remote command fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Stop the push.
    Fatal,
    /// Print and record a warning, then continue.
    Warn,
    Ignore,
}

/// One unit of work on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Run a remote command.
    Remote {
        command: String,
        on_failure: OnFailure,
    },
    /// Copy a file and make it world-readable.
    Copy {
        local: PathBuf,
        remote: String,
        only_if_missing: bool,
    },
    /// Reboot; the connection drops, so the exit status is meaningless.
    Reboot,
}

impl Step {
    fn remote(command: impl Into<String>, on_failure: OnFailure) -> Self {
        Step::Remote {
            command: command.into(),
            on_failure,
        }
    }
}

/// Outcome of a push.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Remote paths written.
    pub copied: Vec<String>,
    /// Remote paths left alone because they already existed.
    pub skipped: Vec<String>,
    /// Remote paths that could not be written.
    pub failed: Vec<String>,
    /// Non-fatal command failures.
    pub warnings: Vec<String>,
}

/// Steps for pushing `assets`, in execution order.
pub fn plan(assets: &AssetPaths) -> Vec<Step> {
    vec![
        Step::remote("echo ok", OnFailure::Fatal),
        Step::remote("mount -o remount,rw /", OnFailure::Fatal),
        Step::remote("mkdir -p /usr/share/fonts", OnFailure::Warn),
        Step::Copy {
            local: assets.font.clone(),
            remote: REMOTE_FONT.to_string(),
            only_if_missing: true,
        },
        Step::Copy {
            local: assets.image.clone(),
            remote: REMOTE_IMAGE.to_string(),
            only_if_missing: false,
        },
        Step::remote(
            "command -v fc-cache >/dev/null 2>&1 && fc-cache -f || true",
            OnFailure::Ignore,
        ),
        Step::remote("sync", OnFailure::Warn),
        Step::remote("mount -o remount,ro /", OnFailure::Warn),
        Step::Reboot,
    ]
}

/// Fail if a local asset is missing. Runs before anything touches the device.
pub fn check_assets(assets: &AssetPaths) -> Result<()> {
    for (what, path) in [("font", &assets.font), ("image", &assets.image)] {
        if !path.is_file() {
            return Err(SetupError::MissingAsset {
                what,
                path: path.clone(),
            }
            .into());
        }
    }
    Ok(())
}

/// Push the assets and reboot the device.
pub fn publish(
    runner: &dyn Runner,
    conn: &Connection,
    assets: &AssetPaths,
) -> Result<PublishReport> {
    check_assets(assets)?;

    println!("Pushing assets to {}...", conn.destination());
    let report = execute(runner, conn, &plan(assets))?;

    if !report.failed.is_empty() {
        return Err(SetupError::CopyFailed {
            failed: report.failed,
        }
        .into());
    }
    Ok(report)
}

/// Run `steps` in order.
pub fn execute(
    runner: &dyn Runner,
    conn: &Connection,
    steps: &[Step],
) -> Result<PublishReport> {
    let mut report = PublishReport::default();

    for step in steps {
        execute_step(runner, conn, step, &mut report)
            .with_context(|| format!("while pushing assets: {:?}", step))?;
    }

    Ok(report)
}

fn execute_step(
    runner: &dyn Runner,
    conn: &Connection,
    step: &Step,
    report: &mut PublishReport,
) -> Result<()> {
    match step {
        Step::Remote {
            command,
            on_failure,
        } => run_remote(runner, conn, command, *on_failure, report)?,

        Step::Copy {
            local,
            remote,
            only_if_missing,
        } => {
            if *only_if_missing && remote_file_exists(runner, conn, remote) {
                println!("  [SKIP] {} already on device", remote);
                report.skipped.push(remote.clone());
                return Ok(());
            }

            println!("  Copying {} -> {}", local.display(), remote);
            let copied = conn
                .scp(local, remote)
                .interactive()
                .allow_fail()
                .run(runner)
                .map(|r| r.success())
                .unwrap_or_else(|e| {
                    warn!("scp could not run: {e:#}");
                    false
                });

            if copied {
                report.copied.push(remote.clone());
                let chmod = format!("chmod 644 {}", shell_quote(remote));
                run_remote(runner, conn, &chmod, OnFailure::Warn, report)?;
            } else {
                println!("  [FAIL] Could not copy {}", local.display());
                report.failed.push(remote.clone());
            }
        }

        Step::Reboot => {
            println!("Rebooting device...");
            // The session is cut by the reboot itself
            run_remote(runner, conn, "/sbin/reboot", OnFailure::Ignore, report)?;
        }
    }

    Ok(())
}

fn run_remote(
    runner: &dyn Runner,
    conn: &Connection,
    command: &str,
    on_failure: OnFailure,
    report: &mut PublishReport,
) -> Result<()> {
    let (code, transcript) = match conn.ssh(command).allow_fail().run(runner) {
        Ok(r) if r.success() => return Ok(()),
        Ok(r) => (r.code, r.transcript()),
        Err(e) => (
            None,
            Transcript {
                stdout: String::new(),
                stderr: format!("{e:#}"),
            },
        ),
    };

    match on_failure {
        OnFailure::Fatal => {
            let destination = conn.destination().to_string();
            let err = match code {
                Some(code) if code != SSH_ERROR_EXIT => SetupError::RemoteCommandFailed {
                    destination,
                    command: command.to_string(),
                    code,
                    transcript,
                },
                _ => SetupError::ConnectionFailed {
                    destination,
                    transcript,
                },
            };
            return Err(err.into());
        }
        OnFailure::Warn => {
            let failure = describe_failure(command, code, &transcript);
            println!("  [WARN] {}", failure);
            report.warnings.push(failure);
        }
        OnFailure::Ignore => debug!("ignored: {}", describe_failure(command, code, &transcript)),
    }
    Ok(())
}

fn describe_failure(command: &str, code: Option<i32>, transcript: &Transcript) -> String {
    match code {
        Some(code) => format!("`{}` exited with {}{}", command, code, transcript),
        None => format!("`{}` did not complete{}", command, transcript),
    }
}

fn remote_file_exists(runner: &dyn Runner, conn: &Connection, remote: &str) -> bool {
    let check = format!(
        "test -f {} && echo exists || echo missing",
        shell_quote(remote)
    );
    conn.ssh(&check)
        .allow_fail()
        .run(runner)
        .map(|r| r.stdout.lines().any(|l| l.trim() == "exists"))
        .unwrap_or(false)
}

/// Single-quote `s` for the remote shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceTarget, SshPaths};
    use crate::process::testing::{failed, ok, ScriptedRunner};
    use crate::process::Cmd;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn assets() -> Result<(TempDir, AssetPaths)> {
        let temp_dir = TempDir::new()?;
        let assets = AssetPaths::new(temp_dir.path());
        fs::write(&assets.font, b"OTTO")?;
        fs::write(&assets.image, b"\x89PNG")?;
        Ok((temp_dir, assets))
    }

    fn remote_command(cmd: &Cmd) -> String {
        cmd.arg_strings().last().cloned().unwrap_or_default()
    }

    fn remote_commands(runner: &ScriptedRunner) -> Vec<String> {
        runner.calls_to("ssh").iter().map(remote_command).collect()
    }

    fn conn() -> Connection {
        let paths = SshPaths::new(Path::new("/home/u/.ssh")).unwrap();
        Connection::alias(&DeviceTarget::remarkable(), &paths)
    }

    #[test]
    fn test_missing_asset_aborts_before_connecting() -> Result<()> {
        let (_tmp, assets) = assets()?;
        fs::remove_file(&assets.image)?;
        let runner = ScriptedRunner::succeeding();

        let err = publish(&runner, &conn(), &assets).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SetupError>(),
            Some(SetupError::MissingAsset { what: "image", .. })
        ));
        assert!(runner.calls().is_empty());
        Ok(())
    }

    #[test]
    fn test_full_push_copies_missing_font_and_reboots() -> Result<()> {
        let (_tmp, assets) = assets()?;
        let runner = ScriptedRunner::new(|cmd| {
            if remote_command(cmd).starts_with("test -f") {
                ok("missing\n")
            } else {
                ok("")
            }
        });

        let report = publish(&runner, &conn(), &assets)?;

        assert_eq!(report.copied, vec![REMOTE_FONT, REMOTE_IMAGE]);
        assert!(report.skipped.is_empty());
        assert!(report.warnings.is_empty());

        let commands = remote_commands(&runner);
        assert_eq!(commands.first().map(String::as_str), Some("echo ok"));
        assert_eq!(commands[1], "mount -o remount,rw /");
        assert!(commands.contains(&format!("chmod 644 '{}'", REMOTE_IMAGE)));
        assert_eq!(commands.last().map(String::as_str), Some("/sbin/reboot"));

        let scps = runner.calls_to("scp");
        assert_eq!(scps.len(), 2);
        assert!(scps.iter().all(|c| c.has_arg("-O") && c.is_interactive()));
        Ok(())
    }

    #[test]
    fn test_existing_font_is_not_copied() -> Result<()> {
        let (_tmp, assets) = assets()?;
        let runner = ScriptedRunner::new(|cmd| {
            if remote_command(cmd).starts_with("test -f") {
                ok("exists\n")
            } else {
                ok("")
            }
        });

        let report = publish(&runner, &conn(), &assets)?;

        assert_eq!(report.skipped, vec![REMOTE_FONT]);
        assert_eq!(report.copied, vec![REMOTE_IMAGE]);
        assert_eq!(runner.calls_to("scp").len(), 1);
        Ok(())
    }

    #[test]
    fn test_unreachable_device_is_fatal() -> Result<()> {
        let (_tmp, assets) = assets()?;
        let runner = ScriptedRunner::new(|_| failed(255, "ssh: connect to host: No route to host"));

        let err = publish(&runner, &conn(), &assets).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SetupError>(),
            Some(SetupError::ConnectionFailed { .. })
        ));
        assert_eq!(runner.calls().len(), 1);
        Ok(())
    }

    #[test]
    fn test_remount_failure_is_fatal() -> Result<()> {
        let (_tmp, assets) = assets()?;
        let runner = ScriptedRunner::new(|cmd| {
            if remote_command(cmd).contains("remount,rw") {
                failed(32, "mount: permission denied")
            } else {
                ok("")
            }
        });

        let err = publish(&runner, &conn(), &assets).unwrap_err();

        match err.downcast_ref::<SetupError>() {
            Some(SetupError::RemoteCommandFailed { command, code, .. }) => {
                assert_eq!(command, "mount -o remount,rw /");
                assert_eq!(*code, 32);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(format!("{:#}", err).contains("mount: permission denied"));
        assert!(runner.calls_to("scp").is_empty());
        Ok(())
    }

    #[test]
    fn test_fatal_step_stops_execution() {
        let runner = ScriptedRunner::new(|cmd| {
            if remote_command(cmd) == "mkdir -p /data" {
                failed(1, "mkdir: Read-only file system")
            } else {
                ok("")
            }
        });
        let steps = [
            Step::remote("mkdir -p /data", OnFailure::Fatal),
            Step::remote("sync", OnFailure::Warn),
        ];

        let err = execute(&runner, &conn(), &steps).unwrap_err();

        assert!(format!("{:#}", err).contains("mkdir: Read-only file system"));
        assert_eq!(remote_commands(&runner), ["mkdir -p /data"]);
    }

    #[test]
    fn test_plan_policies() -> Result<()> {
        let (_tmp, assets) = assets()?;
        let steps = plan(&assets);

        assert_eq!(steps[0], Step::remote("echo ok", OnFailure::Fatal));
        assert_eq!(steps[1], Step::remote("mount -o remount,rw /", OnFailure::Fatal));
        assert!(steps.contains(&Step::remote("sync", OnFailure::Warn)));
        assert_eq!(steps.last(), Some(&Step::Reboot));
        Ok(())
    }

    #[test]
    fn test_chmod_failure_only_warns() -> Result<()> {
        let (_tmp, assets) = assets()?;
        let runner = ScriptedRunner::new(|cmd| {
            let command = remote_command(cmd);
            if command.starts_with("chmod") && command.contains("fonts") {
                failed(1, "chmod: Operation not permitted")
            } else if command.starts_with("test -f") {
                ok("missing\n")
            } else {
                ok("")
            }
        });

        let report = publish(&runner, &conn(), &assets)?;

        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("Operation not permitted"));
        assert_eq!(report.copied, vec![REMOTE_FONT, REMOTE_IMAGE]);
        Ok(())
    }

    #[test]
    fn test_failed_copy_still_reboots_then_errors() -> Result<()> {
        let (_tmp, assets) = assets()?;
        let runner = ScriptedRunner::new(|cmd| match cmd.program() {
            "scp" if remote_command(cmd).ends_with("suspended.png") => failed(1, ""),
            _ if remote_command(cmd).starts_with("test -f") => ok("exists\n"),
            _ => ok(""),
        });

        let err = publish(&runner, &conn(), &assets).unwrap_err();

        match err.downcast_ref::<SetupError>() {
            Some(SetupError::CopyFailed { failed }) => assert_eq!(failed, &vec![REMOTE_IMAGE]),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            remote_commands(&runner).last().map(String::as_str),
            Some("/sbin/reboot")
        );
        Ok(())
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/usr/share/fonts/a b.otf"), "'/usr/share/fonts/a b.otf'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
