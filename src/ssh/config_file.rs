//! `Host` alias block in the user's SSH config.
//!
//! The config is parsed into an ordered list of blocks, each starting at a
//! `Host` line and running until the next `Host` line or end of file. Lines
//! are kept verbatim (terminators included) so everything outside the alias
//! block is written back byte for byte.
//!
//! # Guarantees
//!
//! - After a write at most one block lists the alias (case-insensitive).
//! - The file is not touched when the result would be identical.
//! - `config.bak` receives the pristine file once, right before the first
//!   change, and is never overwritten afterwards.
//!
//! ```text
//! Host reMarkable
//!   HostName 10.11.99.1
//!   User root
//!   IdentityFile /home/me/.ssh/id_ed25519
//!   IdentitiesOnly yes
//!   StrictHostKeyChecking yes
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::{DeviceTarget, SshPaths};

use super::ensure_ssh_dir;
use super::keys::KeyPair;

/// What [`ensure_alias`] did to the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasUpdate {
    /// The alias block was already current; nothing was written.
    Unchanged,
    /// An existing alias block was rewritten in place.
    Replaced,
    /// No alias block existed; one was added at the end.
    Appended,
}

/// One `Host` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBlock {
    header: String,
    patterns: Vec<String>,
    body: Vec<String>,
}

impl ConfigBlock {
    /// The block this tool maintains for `target`.
    pub fn for_alias(target: &DeviceTarget, private_key: &Path) -> Self {
        let directives = [
            ("HostName", target.address.clone()),
            ("User", target.username.clone()),
            ("IdentityFile", quote_value(&private_key.display().to_string())),
            ("IdentitiesOnly", "yes".to_string()),
            ("StrictHostKeyChecking", "yes".to_string()),
        ];

        Self {
            header: format!("Host {}\n", target.alias),
            patterns: vec![target.alias.clone()],
            body: directives
                .iter()
                .map(|(key, value)| format!("  {} {}\n", key, value))
                .collect(),
        }
    }

    fn from_header(header: &str, patterns: &str) -> Self {
        Self {
            header: header.to_string(),
            patterns: patterns
                .split_whitespace()
                .map(|p| p.trim_matches('"').to_string())
                .collect(),
            body: Vec::new(),
        }
    }

    /// Host patterns on the `Host` line.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether one of the patterns names `alias`, ignoring case.
    pub fn matches_alias(&self, alias: &str) -> bool {
        self.patterns.iter().any(|p| p.eq_ignore_ascii_case(alias))
    }

    /// `(keyword, value)` pairs in file order, comments and blanks skipped.
    pub fn directives(&self) -> Vec<(String, String)> {
        self.body
            .iter()
            .filter_map(|line| split_directive(line))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Value of the first directive named `keyword`, ignoring case.
    pub fn get(&self, keyword: &str) -> Option<String> {
        self.directives()
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(keyword))
            .map(|(_, v)| v)
    }

    fn last_line_mut(&mut self) -> &mut String {
        self.body.last_mut().unwrap_or(&mut self.header)
    }

    /// Trailing blank and comment lines, which introduce whatever follows.
    fn trailing_trivia(&self) -> &[String] {
        let keep_from = self
            .body
            .iter()
            .rposition(|line| !is_trivia(line))
            .map_or(0, |i| i + 1);
        &self.body[keep_from..]
    }
}

/// A parsed SSH config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshConfigDocument {
    /// Lines before the first `Host`.
    preamble: Vec<String>,
    blocks: Vec<ConfigBlock>,
}

impl SshConfigDocument {
    pub fn parse(text: &str) -> Self {
        let mut doc = Self::default();

        for line in text.split_inclusive('\n') {
            match split_directive(line) {
                Some((keyword, patterns)) if keyword.eq_ignore_ascii_case("host") => {
                    doc.blocks.push(ConfigBlock::from_header(line, patterns));
                }
                _ => match doc.blocks.last_mut() {
                    Some(block) => block.body.push(line.to_string()),
                    None => doc.preamble.push(line.to_string()),
                },
            }
        }

        doc
    }

    pub fn blocks(&self) -> &[ConfigBlock] {
        &self.blocks
    }

    /// First block naming `alias`.
    pub fn find_alias(&self, alias: &str) -> Option<&ConfigBlock> {
        self.blocks.iter().find(|b| b.matches_alias(alias))
    }

    /// Replace the first block naming the alias, dropping any duplicates, or
    /// append `block` when there is none.
    pub fn upsert(&mut self, mut block: ConfigBlock) -> AliasUpdate {
        let alias = match block.patterns.first() {
            Some(alias) => alias.clone(),
            None => return AliasUpdate::Unchanged,
        };

        let matching: Vec<usize> = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.matches_alias(&alias))
            .map(|(i, _)| i)
            .collect();

        let Some((&first, duplicates)) = matching.split_first() else {
            self.append(block);
            return AliasUpdate::Appended;
        };

        block
            .body
            .extend_from_slice(self.blocks[first].trailing_trivia());
        self.blocks[first] = block;

        // Duplicates always follow `first`, so each has a predecessor to
        // inherit the comments that lead into the next block.
        for &index in duplicates.iter().rev() {
            debug!(alias = %alias, index, "dropping duplicate alias block");
            let removed = self.blocks.remove(index);
            self.blocks[index - 1]
                .body
                .extend_from_slice(removed.trailing_trivia());
        }

        AliasUpdate::Replaced
    }

    fn append(&mut self, block: ConfigBlock) {
        let last = match self.blocks.last_mut() {
            Some(b) => Some(b.last_line_mut()),
            None => self.preamble.last_mut(),
        };

        if let Some(line) = last {
            if !line.ends_with('\n') {
                line.push('\n');
            }
            // Blank line between the previous content and the new block
            let separator = (!line.trim().is_empty()).then(|| "\n".to_string());
            if let Some(sep) = separator {
                match self.blocks.last_mut() {
                    Some(b) => b.body.push(sep),
                    None => self.preamble.push(sep),
                }
            }
        }

        self.blocks.push(block);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
        }
        for block in &self.blocks {
            out.push_str(&block.header);
            for line in &block.body {
                out.push_str(line);
            }
        }
        out
    }
}

/// Make sure the config has a current alias block for `target`.
pub fn ensure_alias(
    target: &DeviceTarget,
    key: &KeyPair,
    paths: &SshPaths,
) -> Result<AliasUpdate> {
    let original = read_if_exists(&paths.config)?;

    let mut doc = SshConfigDocument::parse(&original);
    let update = doc.upsert(ConfigBlock::for_alias(target, &key.private));
    let updated = doc.render();

    if updated == original {
        debug!(config = %paths.config.display(), "alias block already current");
        return Ok(AliasUpdate::Unchanged);
    }

    ensure_ssh_dir(&paths.ssh_dir)?;
    backup_once(&original, &paths.config_backup)?;
    write_atomic(&paths.config, &updated)?;

    info!(config = %paths.config.display(), ?update, "alias block written");
    Ok(update)
}

/// Alias block currently in the config, if any.
pub fn read_alias(target: &DeviceTarget, paths: &SshPaths) -> Result<Option<ConfigBlock>> {
    let text = read_if_exists(&paths.config)?;
    Ok(SshConfigDocument::parse(&text)
        .find_alias(&target.alias)
        .cloned())
}

fn read_if_exists(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn backup_once(original: &str, backup: &Path) -> Result<()> {
    if original.is_empty() || backup.exists() {
        return Ok(());
    }
    write_atomic(backup, original)?;
    info!(backup = %backup.display(), "saved original SSH config");
    Ok(())
}

/// Replace `path` with `content` in one rename.
///
/// Symlinked configs are followed so the link itself survives, and the
/// existing file mode is carried over.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let target: PathBuf = if path.is_symlink() {
        fs::canonicalize(path)
            .with_context(|| format!("Failed to resolve symlink {}", path.display()))?
    } else {
        path.to_path_buf()
    };
    let dir = target.parent().unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;

    if let Ok(meta) = fs::metadata(&target) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }

    tmp.persist(&target)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(())
}

/// `keyword value` or `keyword=value`, or `None` for blanks and comments.
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let end = trimmed
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(trimmed.len());
    let (keyword, rest) = trimmed.split_at(end);
    let rest = rest.trim_start();
    let value = rest.strip_prefix('=').unwrap_or(rest).trim();

    Some((keyword, value))
}

fn is_trivia(line: &str) -> bool {
    split_directive(line).is_none()
}

pub(super) fn quote_value(value: &str) -> String {
    if value.contains(char::is_whitespace) {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}
