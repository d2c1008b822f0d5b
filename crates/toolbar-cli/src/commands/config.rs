//! Config command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};

use toolbar_core::Config;

use crate::output::{Output, OutputFormat};

fn effective_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path.cloned().unwrap_or_else(Config::config_file_path)
}

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let path = effective_path(config_path);
    let config = Config::load_from_path(&path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "base_url": config.base_url,
                    "project_key": config.project_key,
                    "poll_interval_ms": config.poll_interval_ms,
                    "request_timeout_ms": config.request_timeout_ms,
                    "config_file": path,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.base_url);
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  base_url:           {}", config.base_url);
            println!(
                "  project_key:        {}",
                config.project_key.as_deref().unwrap_or("(auto-detect)")
            );
            println!("  poll_interval_ms:   {}", config.poll_interval_ms);
            println!("  request_timeout_ms: {}", config.request_timeout_ms);
            println!();
            println!("Config file: {}", path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let path = effective_path(config_path);
    let mut config = Config::load_from_path(&path).context("Failed to load configuration")?;

    config.set_value(&key, &value)?;
    config
        .save_to_path(&path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        set(
            "poll_interval_ms".to_string(),
            "2500".to_string(),
            Some(&path),
            &output,
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("poll_interval_ms = 2500"));
    }

    #[test]
    fn test_set_unknown_key_leaves_file_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        assert!(set("colour".to_string(), "blue".to_string(), Some(&path), &output).is_err());
        assert!(!path.exists());
    }
}
