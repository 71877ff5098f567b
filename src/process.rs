//! Subprocess invocation.
//!
//! Every external tool (`ssh`, `scp`, `ssh-keygen`, `ssh-keyscan`) is run
//! through [`Cmd`], an argument-vector builder. Nothing is ever handed to a
//! local shell, so paths and host names need no quoting.
//!
//! Execution goes through the [`Runner`] trait. [`SystemRunner`] spawns real
//! processes; tests swap in a scripted runner.
//!
//! ```rust,ignore
//! let result = Cmd::new("ssh-keyscan")
//!     .args(["-H", "-T", "5"])
//!     .arg("10.11.99.1")
//!     .allow_fail()
//!     .run(&SystemRunner)?;
//! ```

use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::Transcript;

/// A command line to execute.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    stdin: Option<String>,
    interactive: bool,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            stdin: None,
            interactive: false,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    /// Feed `input` to the child's stdin.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Inherit the terminal instead of capturing output.
    ///
    /// Used for `scp` so its progress meter stays visible.
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Don't treat a non-zero exit status as an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments as strings, for logging and assertions.
    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }

    pub fn stdin_data(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Run through `runner`, failing on a non-zero exit unless `allow_fail` is set.
    pub fn run(&self, runner: &dyn Runner) -> Result<CommandResult> {
        debug!(program = %self.program, args = ?self.arg_strings(), "running");

        let result = runner
            .run(self)
            .with_context(|| format!("Failed to execute {}", self.program))?;

        if !result.success() && !self.allow_fail {
            bail!(
                "{} failed (exit code {:?}){}",
                self.program,
                result.code,
                result.transcript()
            );
        }

        Ok(result)
    }
}

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn transcript(&self) -> Transcript {
        Transcript {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }
}

/// Executes commands.
pub trait Runner {
    /// Run `cmd` to completion.
    ///
    /// Errors only when the program could not be started at all; a non-zero
    /// exit is reported through [`CommandResult::code`].
    fn run(&self, cmd: &Cmd) -> io::Result<CommandResult>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&self, cmd: &Cmd) -> io::Result<CommandResult> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);

        let stdin = match (&cmd.stdin, cmd.interactive) {
            (Some(_), _) => Stdio::piped(),
            (None, true) => Stdio::inherit(),
            (None, false) => Stdio::null(),
        };
        command.stdin(stdin);

        if cmd.interactive {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = command.spawn()?;

        if let Some(input) = &cmd.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes())?;
            }
        }

        let output = child.wait_with_output()?;
        Ok(CommandResult {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Locate `tool` on `PATH`.
pub fn which(tool: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}


#[cfg(test)]
mod tests {
    use super::testing::{failed, ScriptedRunner};
    use super::*;

    #[test]
    fn test_args_are_kept_verbatim() {
        let cmd = Cmd::new("ssh")
            .args(["-o", "BatchMode=yes"])
            .arg_path(Path::new("/tmp/dir with space/key"))
            .arg("echo Connected; rm -rf /");

        assert_eq!(
            cmd.arg_strings(),
            vec![
                "-o",
                "BatchMode=yes",
                "/tmp/dir with space/key",
                "echo Connected; rm -rf /"
            ]
        );
        assert!(cmd.has_arg("BatchMode=yes"));
    }

    #[test]
    fn test_run_fails_on_nonzero_exit() {
        let runner = ScriptedRunner::new(|_| failed(1, "boom"));
        let err = Cmd::new("false").run(&runner).unwrap_err();

        let msg = format!("{:#}", err);
        assert!(msg.contains("false failed (exit code Some(1))"));
        assert!(msg.contains("STDERR: boom"));
    }

    #[test]
    fn test_allow_fail_returns_result() -> Result<()> {
        let runner = ScriptedRunner::new(|_| failed(255, "unreachable"));
        let result = Cmd::new("ssh").allow_fail().run(&runner)?;

        assert!(!result.success());
        assert_eq!(result.code, Some(255));
        Ok(())
    }

    #[test]
    fn test_system_runner_captures_output_and_stdin() -> Result<()> {
        let result = Cmd::new("cat").stdin("hello\n").run(&SystemRunner)?;

        assert!(result.success());
        assert_eq!(result.stdout, "hello\n");
        Ok(())
    }

    #[test]
    fn test_system_runner_missing_program() {
        let result = Cmd::new("definitely_not_a_real_command_12345").run(&SystemRunner);
        assert!(result.is_err());
    }

    #[test]
    fn test_which() {
        // sh exists on any Unix system
        assert!(which("sh").is_some());
        assert!(which("definitely_not_a_real_command_12345").is_none());
    }
}
