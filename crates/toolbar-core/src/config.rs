//! Toolbar configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/flag-toolbar/config.toml)
//! 3. Environment variables (FLAG_TOOLBAR_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::client::DEFAULT_TIMEOUT;
use crate::engine::{EngineOptions, DEFAULT_POLL_INTERVAL};

/// Environment variable prefix
const ENV_PREFIX: &str = "FLAG_TOOLBAR";

/// Dev server address used when nothing else is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:8765";

/// Toolbar configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Dev server base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Project to sync; auto-detected when unset
    #[serde(default)]
    pub project_key: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-request timeout for dev server calls
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            project_key: None,
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (FLAG_TOOLBAR_BASE_URL, FLAG_TOOLBAR_PROJECT, ...)
    /// 2. Config file (~/.config/flag-toolbar/config.toml or FLAG_TOOLBAR_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
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
        // FLAG_TOOLBAR_BASE_URL
        if let Ok(val) = std::env::var(format!("{}_BASE_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.base_url = val;
            }
        }

        // FLAG_TOOLBAR_PROJECT
        if let Ok(val) = std::env::var(format!("{}_PROJECT", ENV_PREFIX)) {
            self.project_key = if val.is_empty() { None } else { Some(val) };
        }

        if let Some(ms) = env_millis("POLL_INTERVAL_MS") {
            self.poll_interval_ms = ms;
        }

        if let Some(ms) = env_millis("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = ms;
        }
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Set a single value by its config file key
    ///
    /// An empty value for `project_key` clears it.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "base_url" => {
                if value.is_empty() {
                    bail!("base_url cannot be empty");
                }
                self.base_url = value.to_string();
            }
            "project_key" => {
                self.project_key = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "poll_interval_ms" => {
                self.poll_interval_ms = value
                    .parse()
                    .with_context(|| format!("Invalid poll_interval_ms: {}", value))?;
            }
            "request_timeout_ms" => {
                self.request_timeout_ms = value
                    .parse()
                    .with_context(|| format!("Invalid request_timeout_ms: {}", value))?;
            }
            other => bail!(
                "Unknown config key '{}'. Valid keys: base_url, project_key, poll_interval_ms, request_timeout_ms",
                other
            ),
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with FLAG_TOOLBAR_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flag-toolbar")
            .join("config.toml")
    }

    /// Options for `SyncEngine::start`
    pub fn engine_options(&self) -> EngineOptions {
        let options = EngineOptions::new(self.base_url.clone())
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms));
        match &self.project_key {
            Some(key) => options.with_project_key(key.clone()),
            None => options,
        }
    }

    /// Request timeout for the HTTP client
    pub fn client_timeout(&self) -> Duration {
        if self.request_timeout_ms == 0 {
            DEFAULT_TIMEOUT
        } else {
            Duration::from_millis(self.request_timeout_ms)
        }
    }
}

fn env_millis(suffix: &str) -> Option<u64> {
    let name = format!("{}_{}", ENV_PREFIX, suffix);
    let val = std::env::var(&name).ok()?;
    match val.trim().parse() {
        Ok(ms) => Some(ms),
        Err(_) => {
            warn!("Ignoring {}: '{}' is not a number of milliseconds", name, val);
            None
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

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
        "FLAG_TOOLBAR_BASE_URL",
        "FLAG_TOOLBAR_PROJECT",
        "FLAG_TOOLBAR_POLL_INTERVAL_MS",
        "FLAG_TOOLBAR_REQUEST_TIMEOUT_MS",
        "FLAG_TOOLBAR_CONFIG",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.base_url, "http://localhost:8765");
        assert!(config.project_key.is_none());
        assert_eq!(config.poll_interval_ms, 5000);
        assert_eq!(config.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_config_file_path() {
        let _guard = EnvGuard::new(ENV_VARS);

        assert!(Config::config_file_path().ends_with("flag-toolbar/config.toml"));

        env::set_var("FLAG_TOOLBAR_CONFIG", "/tmp/toolbar.toml");
        assert_eq!(Config::config_file_path(), PathBuf::from("/tmp/toolbar.toml"));
    }

    #[test]
    fn test_env_override_base_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("FLAG_TOOLBAR_BASE_URL", "http://127.0.0.1:9000");
        config.apply_env_overrides();
        assert_eq!(config.base_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_env_override_project() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("FLAG_TOOLBAR_PROJECT", "web-app");
        config.apply_env_overrides();
        assert_eq!(config.project_key, Some("web-app".to_string()));

        // Empty string clears it
        env::set_var("FLAG_TOOLBAR_PROJECT", "");
        config.apply_env_overrides();
        assert!(config.project_key.is_none());
    }

    #[test]
    fn test_env_override_intervals() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("FLAG_TOOLBAR_POLL_INTERVAL_MS", "250");
        env::set_var("FLAG_TOOLBAR_REQUEST_TIMEOUT_MS", "not-a-number");
        config.apply_env_overrides();

        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            base_url = "http://dev.local:8765"
            project_key = "checkout"
            poll_interval_ms = 1000
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.base_url, "http://dev.local:8765");
        assert_eq!(config.project_key, Some("checkout".to_string()));
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_load_from_str_invalid() {
        let _guard = EnvGuard::new(ENV_VARS);
        assert!(Config::load_from_str("poll_interval_ms = \"soon\"").is_err());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set_value("project_key", "mobile").unwrap();
        config.set_value("poll_interval_ms", "750").unwrap();
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_env_beats_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "project_key = \"from-file\"\n").unwrap();

        env::set_var("FLAG_TOOLBAR_PROJECT", "from-env");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.project_key, Some("from-env".to_string()));
    }

    #[test]
    fn test_set_value() {
        let mut config = Config::default();

        config.set_value("base_url", "http://other:1").unwrap();
        assert_eq!(config.base_url, "http://other:1");

        config.set_value("project_key", "p").unwrap();
        config.set_value("project_key", "").unwrap();
        assert!(config.project_key.is_none());

        assert!(config.set_value("poll_interval_ms", "fast").is_err());
        assert!(config.set_value("base_url", "").is_err());
        assert!(config.set_value("colour", "blue").is_err());
    }

    #[test]
    fn test_engine_options() {
        let config = Config {
            project_key: Some("web".to_string()),
            poll_interval_ms: 0,
            ..Default::default()
        };

        let options = config.engine_options();
        assert_eq!(options.base_url, "http://localhost:8765");
        assert_eq!(options.project_key.as_deref(), Some("web"));
        assert_eq!(options.poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_client_timeout() {
        let mut config = Config::default();
        assert_eq!(config.client_timeout(), Duration::from_secs(10));

        config.request_timeout_ms = 0;
        assert_eq!(config.client_timeout(), DEFAULT_TIMEOUT);

        config.request_timeout_ms = 1500;
        assert_eq!(config.client_timeout(), Duration::from_millis(1500));
    }
}
