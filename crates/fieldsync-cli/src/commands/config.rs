//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use fieldsync_core::Config;

use crate::output::{Output, OutputFormat};

/// Keys accepted by `config set`
const VALID_KEYS: &str = "data_dir, server_url, sync_enabled, sync_interval_secs, \
     retry_base_delay_secs, max_retry_attempts, request_timeout_secs, \
     rate_limit_floor_secs, max_queue_retries, probe_interval_secs, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_value(&config)?);
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:              {}", config.data_dir.display());
            println!(
                "  server_url:            {}",
                config.server_url.as_deref().unwrap_or("(not set)")
            );
            println!("  sync_enabled:          {}", config.sync_enabled);
            println!("  sync_interval_secs:    {}", config.sync_interval_secs);
            println!("  retry_base_delay_secs: {}", config.retry_base_delay_secs);
            println!("  max_retry_attempts:    {}", config.max_retry_attempts);
            println!("  request_timeout_secs:  {}", config.request_timeout_secs);
            println!("  rate_limit_floor_secs: {}", config.rate_limit_floor_secs);
            println!("  max_queue_retries:     {}", config.max_queue_retries);
            println!("  probe_interval_secs:   {}", config.probe_interval_secs);
            println!(
                "  log_file:              {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
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
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

/// Apply one `key = value` change to `config`
fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "server_url" => {
            config.server_url = optional(value);
        }
        "sync_enabled" => {
            config.sync_enabled = value
                .parse()
                .context("Invalid value for sync_enabled. Use 'true' or 'false'.")?;
        }
        "sync_interval_secs" => config.sync_interval_secs = number(key, value)?,
        "retry_base_delay_secs" => config.retry_base_delay_secs = number(key, value)?,
        "max_retry_attempts" => config.max_retry_attempts = number(key, value)?,
        "request_timeout_secs" => config.request_timeout_secs = number(key, value)?,
        "rate_limit_floor_secs" => config.rate_limit_floor_secs = number(key, value)?,
        "max_queue_retries" => config.max_queue_retries = number(key, value)?,
        "probe_interval_secs" => config.probe_interval_secs = number(key, value)?,
        "log_file" => {
            config.log_file = optional(value).map(PathBuf::from);
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    match value.trim().parse() {
        Ok(n) => Ok(n),
        Err(_) => bail!("Invalid value for {}. Expected a non-negative number.", key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_values() {
        let mut config = Config::default();

        apply(&mut config, "server_url", "https://sync.example.com").unwrap();
        apply(&mut config, "sync_enabled", "true").unwrap();
        apply(&mut config, "sync_interval_secs", "45").unwrap();
        apply(&mut config, "max_queue_retries", "3").unwrap();

        assert_eq!(config.server_url.as_deref(), Some("https://sync.example.com"));
        assert!(config.sync_enabled);
        assert_eq!(config.sync_interval_secs, 45);
        assert_eq!(config.max_queue_retries, 3);

        apply(&mut config, "server_url", "none").unwrap();
        assert!(config.server_url.is_none());
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let mut config = Config::default();
        assert!(apply(&mut config, "sync_enabled", "maybe").is_err());
        assert!(apply(&mut config, "sync_interval_secs", "-1").is_err());
        assert!(apply(&mut config, "favorite_color", "blue").is_err());
    }

    #[test]
    fn test_set_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!("data_dir = {:?}\n", temp_dir.path().join("data")),
        )
        .unwrap();
        let output = Output::new(OutputFormat::Quiet);

        set(
            "server_url".to_string(),
            "https://sync.example.com".to_string(),
            Some(&path),
            &output,
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("server_url = \"https://sync.example.com\""));
    }
}
