//! Local asset presence.

use super::CheckResult;
use crate::config::AssetPaths;

/// One result per asset file.
pub fn check_assets(assets: &AssetPaths) -> Vec<CheckResult> {
    [("Font asset", &assets.font), ("Image asset", &assets.image)]
        .into_iter()
        .map(|(name, path)| {
            if path.is_file() {
                CheckResult::pass(name, format!("Found at {}", path.display()))
            } else {
                CheckResult::fail(
                    name,
                    format!("Not found at {}", path.display()),
                    "Put the file in the assets directory or pass --assets <dir>",
                )
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_check_assets() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let assets = AssetPaths::new(temp_dir.path());
        fs::write(&assets.font, b"OTTO")?;

        let results = check_assets(&assets);
        assert_eq!(results.len(), 2);
        assert!(results[0].passed);
        assert!(!results[1].passed);
        Ok(())
    }
}
