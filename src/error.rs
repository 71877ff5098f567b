//! Fatal conditions that callers need to tell apart.
//!
//! Most failures are plain `anyhow` errors with context attached. The ones
//! below abort a run on purpose and carry whatever the failing subprocess
//! printed, so the user can see why.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Captured output of a subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        if !stdout.is_empty() {
            write!(f, "\nSTDOUT: {}", stdout)?;
        }
        if !stderr.is_empty() {
            write!(f, "\nSTDERR: {}", stderr)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    /// The key could not be appended to the device's authorized keys.
    #[error("Failed to install key on {destination}{transcript}")]
    InstallFailed {
        destination: String,
        transcript: Transcript,
    },

    /// The key was installed but key-only login still does not work.
    #[error("Passwordless SSH to {destination} still fails after installing the key{transcript}")]
    StillNotPasswordless {
        destination: String,
        transcript: Transcript,
    },

    /// `ssh-keygen` did not leave a usable keypair behind.
    #[error("Could not create a keypair at {}{transcript}", path.display())]
    KeyGenerationFailed { path: PathBuf, transcript: Transcript },

    #[error("Missing {what}: {}", path.display())]
    MissingAsset { what: &'static str, path: PathBuf },

    #[error("SSH connection to {destination} failed{transcript}")]
    ConnectionFailed {
        destination: String,
        transcript: Transcript,
    },

    /// A remote step the push cannot continue without exited non-zero.
    #[error("`{command}` failed on {destination} (exit code {code}){transcript}")]
    RemoteCommandFailed {
        destination: String,
        command: String,
        code: i32,
        transcript: Transcript,
    },

    /// One or more files did not reach the device.
    #[error("Failed to copy {} file(s) to the device: {}", failed.len(), failed.join(", "))]
    CopyFailed { failed: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_display_skips_empty_streams() {
        let t = Transcript {
            stdout: String::new(),
            stderr: "Permission denied (publickey).\n".to_string(),
        };
        assert_eq!(t.to_string(), "\nSTDERR: Permission denied (publickey).");
    }

    #[test]
    fn test_error_message_includes_transcript() {
        let err = SetupError::InstallFailed {
            destination: "root@10.11.99.1".to_string(),
            transcript: Transcript {
                stdout: "partial".to_string(),
                stderr: "mkdir: read-only file system".to_string(),
            },
        };

        let msg = err.to_string();
        assert!(msg.starts_with("Failed to install key on root@10.11.99.1"));
        assert!(msg.contains("STDOUT: partial"));
        assert!(msg.contains("STDERR: mkdir: read-only file system"));
    }
}
