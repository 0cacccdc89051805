//! Configuration management commands

use super::output;
use anyhow::{Context, Result};
use foreman_core::ForemanConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Resolve the config file path, preferring an explicit `--config`.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => ForemanConfig::config_path().context("Failed to locate configuration file"),
    }
}

/// Load the configuration used by every other command.
///
/// An explicit path must exist. Without one, defaults are used when the
/// default file is missing.
pub async fn load(explicit: Option<&Path>) -> Result<ForemanConfig> {
    match explicit {
        Some(path) => ForemanConfig::load_from_path(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => ForemanConfig::load_or_default()
            .await
            .context("Failed to load configuration"),
    }
}

/// Write a default configuration file
pub async fn init(explicit: Option<&Path>, force: bool) -> Result<PathBuf> {
    let path = resolve_path(explicit)?;
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    ForemanConfig::default()
        .save_to_path(&path)
        .await
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    info!("Wrote default configuration to {}", path.display());
    output::success(format!("Configuration written to {}", path.display()));
    Ok(path)
}

/// Print the effective configuration as TOML
pub async fn show(explicit: Option<&Path>) -> Result<()> {
    let config = load(explicit).await?;
    let rendered = config.to_toml_string()?;
    println!("{}", rendered.trim_end());
    Ok(())
}

/// Check that the configuration file parses and validates
pub async fn validate(explicit: Option<&Path>) -> Result<()> {
    let path = resolve_path(explicit)?;
    if !path.exists() {
        output::warn(format!("No configuration at {}, defaults apply", path.display()));
        ForemanConfig::default().validate()?;
        return Ok(());
    }

    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut config = ForemanConfig::from_toml_str(&content)?;
    config.merge_env_vars()?;
    config.validate()?;

    output::success(format!("{} is valid", path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreman.toml");

        init(Some(&path), false).await.unwrap();
        let config = load(Some(&path)).await.unwrap();
        assert_eq!(config.general().supervisor_id, "supervisor");

        assert!(init(Some(&path), false).await.is_err());
        init(Some(&path), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreman.toml");
        tokio::fs::write(&path, "[bus]\ndefault_hop_limit = 0\n").await.unwrap();

        assert!(validate(Some(&path)).await.is_err());
        assert!(load(Some(&path)).await.is_err());
    }
}
