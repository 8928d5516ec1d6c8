//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/fieldsync/config.toml)
//! 3. Environment variables (FIELDSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::sync::OrchestratorConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "FIELDSYNC";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite db, token)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the remote sync authority (optional)
    #[serde(default)]
    pub server_url: Option<String>,

    /// Whether sync is enabled
    #[serde(default)]
    pub sync_enabled: bool,

    /// Seconds between periodic sync cycles
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Base delay for backoff retries, in seconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,

    /// Consecutive backoff retries before deferring to the periodic tick
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Ceiling for a single remote call, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Wait used when a 429 response carries no retry hint
    #[serde(default = "default_rate_limit_floor")]
    pub rate_limit_floor_secs: u64,

    /// Failed deliveries after which a queue entry is abandoned
    #[serde(default = "default_max_queue_retries")]
    pub max_queue_retries: u32,

    /// Seconds between connectivity probes
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Write logs here instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server_url: None,
            sync_enabled: false,
            sync_interval_secs: default_sync_interval(),
            retry_base_delay_secs: default_retry_base_delay(),
            max_retry_attempts: default_max_retry_attempts(),
            request_timeout_secs: default_request_timeout(),
            rate_limit_floor_secs: default_rate_limit_floor(),
            max_queue_retries: default_max_queue_retries(),
            probe_interval_secs: default_probe_interval(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (FIELDSYNC_DATA_DIR, FIELDSYNC_SERVER_URL, ...)
    /// 2. Config file (~/.config/fieldsync/config.toml or FIELDSYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_SERVER_URL", ENV_PREFIX)) {
            self.server_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_SYNC_ENABLED", ENV_PREFIX)) {
            self.sync_enabled = val.eq_ignore_ascii_case("true") || val == "1";
        }

        // Unparseable numbers are ignored rather than failing startup
        if let Some(secs) = env_number(&format!("{}_SYNC_INTERVAL_SECS", ENV_PREFIX)) {
            self.sync_interval_secs = secs;
        }

        if let Some(secs) = env_number(&format!("{}_REQUEST_TIMEOUT_SECS", ENV_PREFIX)) {
            self.request_timeout_secs = secs;
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_FILE", ENV_PREFIX)) {
            self.log_file = if val.is_empty() { None } else { Some(val.into()) };
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with FIELDSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fieldsync")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("fieldsync.db")
    }

    /// Get the path to the stored access token
    pub fn token_path(&self) -> PathBuf {
        self.data_dir.join("token")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_floor(&self) -> Duration {
        Duration::from_secs(self.rate_limit_floor_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    /// Timing policy for the sync orchestrator
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            sync_interval: Duration::from_secs(self.sync_interval_secs.max(1)),
            retry_base_delay: Duration::from_secs(self.retry_base_delay_secs),
            max_retry_attempts: self.max_retry_attempts,
            attempt_timeout: self.request_timeout(),
        }
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
}

fn default_sync_interval() -> u64 {
    30
}

fn default_retry_base_delay() -> u64 {
    5
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_rate_limit_floor() -> u64 {
    60
}

fn default_max_queue_retries() -> u32 {
    5
}

fn default_probe_interval() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "FIELDSYNC_DATA_DIR",
        "FIELDSYNC_SERVER_URL",
        "FIELDSYNC_SYNC_ENABLED",
        "FIELDSYNC_SYNC_INTERVAL_SECS",
        "FIELDSYNC_REQUEST_TIMEOUT_SECS",
        "FIELDSYNC_LOG_FILE",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.sync_enabled);
        assert!(config.server_url.is_none());
        assert!(config.data_dir.ends_with("fieldsync"));
        assert_eq!(config.sync_interval_secs, 30);
        assert_eq!(config.rate_limit_floor(), Duration::from_secs(60));
    }

    #[test]
    fn test_file_paths() {
        let config = Config::default();
        assert!(config.sqlite_path().ends_with("fieldsync.db"));
        assert!(config.token_path().ends_with("token"));
    }

    #[test]
    fn test_orchestrator_config() {
        let config = Config {
            sync_interval_secs: 15,
            retry_base_delay_secs: 2,
            max_retry_attempts: 3,
            request_timeout_secs: 20,
            ..Config::default()
        };

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.sync_interval, Duration::from_secs(15));
        assert_eq!(orchestrator.retry_base_delay, Duration::from_secs(2));
        assert_eq!(orchestrator.max_retry_attempts, 3);
        assert_eq!(orchestrator.attempt_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("FIELDSYNC_DATA_DIR", "/tmp/fieldsync-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/fieldsync-test"));
    }

    #[test]
    fn test_env_override_sync_enabled() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        assert!(!config.sync_enabled);

        env::set_var("FIELDSYNC_SYNC_ENABLED", "true");
        config.apply_env_overrides();
        assert!(config.sync_enabled);

        env::set_var("FIELDSYNC_SYNC_ENABLED", "1");
        config.sync_enabled = false;
        config.apply_env_overrides();
        assert!(config.sync_enabled);

        env::set_var("FIELDSYNC_SYNC_ENABLED", "false");
        config.apply_env_overrides();
        assert!(!config.sync_enabled);
    }

    #[test]
    fn test_env_override_server_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("FIELDSYNC_SERVER_URL", "https://sync.example.com");
        config.apply_env_overrides();
        assert_eq!(
            config.server_url,
            Some("https://sync.example.com".to_string())
        );

        // Empty string clears it
        env::set_var("FIELDSYNC_SERVER_URL", "");
        config.apply_env_overrides();
        assert!(config.server_url.is_none());
    }

    #[test]
    fn test_env_override_numbers() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("FIELDSYNC_SYNC_INTERVAL_SECS", "90");
        env::set_var("FIELDSYNC_REQUEST_TIMEOUT_SECS", "not-a-number");
        config.apply_env_overrides();

        assert_eq!(config.sync_interval_secs, 90);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            server_url = "https://example.com"
            sync_enabled = true
            max_retry_attempts = 2
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.server_url, Some("https://example.com".to_string()));
        assert!(config.sync_enabled);
        assert_eq!(config.max_retry_attempts, 2);
        // Unspecified fields fall back to defaults
        assert_eq!(config.max_queue_retries, 5);
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let config = Config {
            data_dir: temp_dir.path().join("data"),
            server_url: Some("https://sync.example.com".to_string()),
            sync_enabled: true,
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.server_url, config.server_url);
        assert!(loaded.sync_enabled);
        assert!(loaded.data_dir.exists());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        env::set_var("FIELDSYNC_DATA_DIR", temp_dir.path().join("data"));

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert!(!config.sync_enabled);
        assert!(config.server_url.is_none());
    }
}
