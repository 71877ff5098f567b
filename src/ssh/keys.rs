//! Keypair discovery and creation.
//!
//! Search order:
//! 1. conventional names from [`DEFAULT_KEY_NAMES`], first complete pair wins
//! 2. any `*.pub` in the SSH directory whose private half exists (sorted by name)
//! 3. generate a new passphrase-less ed25519 key at `~/.ssh/id_ed25519`
//!
//! An existing pair is always reused, so running the tool repeatedly never
//! creates a second key. Keys are never deleted.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{SshPaths, DEFAULT_KEY_NAMES, GENERATED_KEY_NAME, GENERATED_KEY_TYPE};
use crate::error::{SetupError, Transcript};
use crate::process::{Cmd, Runner};

use super::ensure_ssh_dir;

/// Private key and its `.pub` companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private: PathBuf,
    pub public: PathBuf,
}

impl KeyPair {
    /// Pair for a private key path (`<path>.pub` is the public half).
    pub fn for_private(private: &Path) -> Self {
        let mut public = private.as_os_str().to_os_string();
        public.push(".pub");
        Self {
            private: private.to_path_buf(),
            public: PathBuf::from(public),
        }
    }

    fn is_complete(&self) -> bool {
        self.private.is_file() && self.public.is_file()
    }

    /// Public key line with exactly one trailing newline.
    pub fn public_key_line(&self) -> Result<String> {
        let text = fs::read_to_string(&self.public)
            .with_context(|| format!("Failed to read public key: {}", self.public.display()))?;
        Ok(format!("{}\n", text.trim_end_matches(['\n', '\r'])))
    }
}

/// Find a usable keypair without creating anything.
pub fn find_existing(ssh_dir: &Path) -> Result<Option<KeyPair>> {
    for name in DEFAULT_KEY_NAMES {
        let pair = KeyPair::for_private(&ssh_dir.join(name));
        if pair.is_complete() {
            return Ok(Some(pair));
        }
    }

    if !ssh_dir.is_dir() {
        return Ok(None);
    }

    let mut public_keys: Vec<PathBuf> = fs::read_dir(ssh_dir)
        .with_context(|| format!("Failed to list {}", ssh_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "pub"))
        .collect();
    public_keys.sort();

    for public in public_keys {
        let private = public.with_extension("");
        if private.is_file() && public.is_file() {
            return Ok(Some(KeyPair { private, public }));
        }
    }

    Ok(None)
}

/// Return a usable keypair, generating one only if none exists.
pub fn select_or_create(runner: &dyn Runner, paths: &SshPaths) -> Result<KeyPair> {
    if let Some(pair) = find_existing(&paths.ssh_dir)? {
        debug!(key = %pair.private.display(), "using existing keypair");
        return Ok(pair);
    }

    ensure_ssh_dir(&paths.ssh_dir)?;
    let pair = KeyPair::for_private(&paths.ssh_dir.join(GENERATED_KEY_NAME));

    // A lone private key is kept; only its public half is derived again.
    let result = if pair.private.is_file() {
        info!(key = %pair.private.display(), "public key missing, deriving it");
        derive_public_key(runner, &pair)
    } else {
        info!(key = %pair.private.display(), "generating new {} key", GENERATED_KEY_TYPE);
        Cmd::new("ssh-keygen")
            .args(["-t", GENERATED_KEY_TYPE, "-q", "-N", ""])
            .arg("-f")
            .arg_path(&pair.private)
            .allow_fail()
            .run(runner)
            .map(|r| r.transcript())
            .and_then(|transcript| {
                if pair.is_complete() {
                    Ok(())
                } else {
                    Err(key_error(&pair, transcript))
                }
            })
    };

    result?;
    Ok(pair)
}

fn derive_public_key(runner: &dyn Runner, pair: &KeyPair) -> Result<()> {
    let result = Cmd::new("ssh-keygen")
        .arg("-y")
        .arg("-f")
        .arg_path(&pair.private)
        .allow_fail()
        .run(runner)?;

    if !result.success() || result.stdout.trim().is_empty() {
        return Err(key_error(pair, result.transcript()));
    }

    fs::write(&pair.public, format!("{}\n", result.stdout.trim_end()))
        .with_context(|| format!("Failed to write {}", pair.public.display()))?;
    Ok(())
}

fn key_error(pair: &KeyPair, transcript: Transcript) -> anyhow::Error {
    SetupError::KeyGenerationFailed {
        path: pair.private.clone(),
        transcript,
    }
    .into()
}
