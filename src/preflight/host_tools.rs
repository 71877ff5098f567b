//! Host tool validation.
//!
//! Checks that the OpenSSH client tools are installed and executable.

use anyhow::{bail, Result};

use super::CheckResult;
use crate::process::which;

const INSTALL_OPENSSH: &str = "Install the OpenSSH client (openssh-client / openssh-clients)";

/// Required host tools with their install suggestions.
const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("ssh", "run commands on the device", INSTALL_OPENSSH),
    ("scp", "copy assets to the device", INSTALL_OPENSSH),
    ("ssh-keygen", "create keys and prune known_hosts", INSTALL_OPENSSH),
    ("ssh-keyscan", "fetch device host keys", INSTALL_OPENSSH),
];

/// Check that all required host tools are installed.
pub fn check_host_tools() -> Vec<CheckResult> {
    REQUIRED_TOOLS
        .iter()
        .map(|(tool, purpose, install)| check_tool(tool, purpose, install))
        .collect()
}

/// Fail with every missing tool listed.
pub fn require_host_tools() -> Result<()> {
    let missing: Vec<String> = check_host_tools()
        .into_iter()
        .filter(|c| !c.passed)
        .map(|c| c.name)
        .collect();

    if !missing.is_empty() {
        bail!(
            "Missing required tools: {}\n\
             Install the OpenSSH client and try again.",
            missing.join(", ")
        );
    }
    Ok(())
}

fn check_tool(tool: &str, purpose: &str, install_cmd: &str) -> CheckResult {
    match which(tool) {
        Some(path) => CheckResult::pass(
            tool,
            format!("Found at {} ({})", path.display(), purpose),
        ),
        None => CheckResult::fail(
            tool,
            format!("Not found (needed to: {})", purpose),
            install_cmd,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_host_tools_returns_results() {
        let results = check_host_tools();
        assert_eq!(results.len(), REQUIRED_TOOLS.len());
        assert_eq!(results[0].name, "ssh");
    }

    #[test]
    fn test_missing_tool_has_suggestion() {
        let result = check_tool("definitely_not_a_real_command_12345", "testing", "install it");
        assert!(!result.passed);
        assert_eq!(result.suggestion.as_deref(), Some("install it"));
    }
}
