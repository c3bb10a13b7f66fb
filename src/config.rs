use nutrilog_core::{HttpStore, LedgerOptions, ListenerOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    fn set(&mut self, value: T, source: ConfigSource) {
        self.value = value;
        self.source = source;
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Server URL (e.g., "http://localhost:8080")
    pub server_url: ConfigValue<String>,
    /// API key for authentication
    pub api_key: ConfigValue<Option<String>>,
    /// User whose ledger is read and written
    pub user_id: ConfigValue<Option<String>>,
    /// Delay before reconciling after a confirmed write
    pub settle_delay_ms: ConfigValue<u64>,
    /// Upper bound on a single remote request
    pub request_timeout_ms: ConfigValue<u64>,
    /// Quiet period coalescing change-feed signals
    pub feed_debounce_ms: ConfigValue<u64>,
    /// Length of the history window in days
    pub history_days: ConfigValue<u32>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    server_url: Option<String>,
    api_key: Option<String>,
    user_id: Option<String>,
    settle_delay_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    feed_debounce_ms: Option<u64>,
    history_days: Option<u32>,
}

/// Overrides `target` from the environment variable `name`, if set.
fn env_override<T: FromStr>(
    name: &'static str,
    target: &mut ConfigValue<T>,
) -> Result<(), ConfigError> {
    if let Ok(raw) = std::env::var(name) {
        let value = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, raw.clone()))?;
        target.set(value, ConfigSource::Environment);
    }
    Ok(())
}

fn env_override_optional(name: &'static str, target: &mut ConfigValue<Option<String>>) {
    if let Ok(value) = std::env::var(name) {
        target.set(Some(value), ConfigSource::Environment);
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let defaults = LedgerOptions::default();

        // Start with defaults
        let mut config = Self {
            server_url: ConfigValue::new(
                "http://localhost:8080".to_string(),
                ConfigSource::Default,
            ),
            api_key: ConfigValue::new(None, ConfigSource::Default),
            user_id: ConfigValue::new(None, ConfigSource::Default),
            settle_delay_ms: ConfigValue::new(
                defaults.settle_delay.as_millis() as u64,
                ConfigSource::Default,
            ),
            request_timeout_ms: ConfigValue::new(
                defaults.request_timeout.as_millis() as u64,
                ConfigSource::Default,
            ),
            feed_debounce_ms: ConfigValue::new(
                ListenerOptions::default().debounce.as_millis() as u64,
                ConfigSource::Default,
            ),
            history_days: ConfigValue::new(defaults.history_days, ConfigSource::Default),
            config_file: None,
        };

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config.config_file = Some(path);
            config.apply_file(file_config);
        }

        // Apply environment variable overrides
        env_override("NUTRILOG_SERVER_URL", &mut config.server_url)?;
        env_override_optional("NUTRILOG_API_KEY", &mut config.api_key);
        env_override_optional("NUTRILOG_USER_ID", &mut config.user_id);
        env_override("NUTRILOG_SETTLE_DELAY_MS", &mut config.settle_delay_ms)?;
        env_override("NUTRILOG_REQUEST_TIMEOUT_MS", &mut config.request_timeout_ms)?;
        env_override("NUTRILOG_FEED_DEBOUNCE_MS", &mut config.feed_debounce_ms)?;
        env_override("NUTRILOG_HISTORY_DAYS", &mut config.history_days)?;

        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        let from_file = ConfigSource::File;
        if let Some(url) = file.server_url {
            self.server_url.set(url, from_file.clone());
        }
        if let Some(key) = file.api_key {
            self.api_key.set(Some(key), from_file.clone());
        }
        if let Some(user) = file.user_id {
            self.user_id.set(Some(user), from_file.clone());
        }
        if let Some(ms) = file.settle_delay_ms {
            self.settle_delay_ms.set(ms, from_file.clone());
        }
        if let Some(ms) = file.request_timeout_ms {
            self.request_timeout_ms.set(ms, from_file.clone());
        }
        if let Some(ms) = file.feed_debounce_ms {
            self.feed_debounce_ms.set(ms, from_file.clone());
        }
        if let Some(days) = file.history_days {
            self.history_days.set(days, from_file);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms.value == 0 {
            return Err(ConfigError::InvalidValue("request_timeout_ms", "0".to_string()));
        }
        if self.history_days.value == 0 {
            return Err(ConfigError::InvalidValue("history_days", "0".to_string()));
        }
        Ok(())
    }

    pub fn ledger_options(&self) -> LedgerOptions {
        LedgerOptions {
            settle_delay: Duration::from_millis(self.settle_delay_ms.value),
            request_timeout: Duration::from_millis(self.request_timeout_ms.value),
            history_days: self.history_days.value,
        }
    }

    pub fn listener_options(&self) -> ListenerOptions {
        ListenerOptions {
            debounce: Duration::from_millis(self.feed_debounce_ms.value),
            ..ListenerOptions::default()
        }
    }

    pub fn require_user_id(&self) -> Result<&str, ConfigError> {
        self.user_id
            .value
            .as_deref()
            .ok_or(ConfigError::Missing("user_id"))
    }

    /// Client for the configured server. Requires an API key.
    pub fn store(&self) -> Result<HttpStore, ConfigError> {
        let api_key = self
            .api_key
            .value
            .as_deref()
            .ok_or(ConfigError::Missing("api_key"))?;
        Ok(HttpStore::new(self.server_url.value.clone(), api_key))
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/nutrilog/
    /// - macOS: ~/Library/Application Support/nutrilog/
    /// - Windows: %APPDATA%/nutrilog/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nutrilog")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(&'static str, String),
    Missing(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(key, value) => {
                write!(f, "Invalid value for {}: '{}'", key, value)
            }
            ConfigError::Missing(key) => write!(
                f,
                "{} is not configured. Set it in the config file or via NUTRILOG_{}",
                key,
                key.to_uppercase()
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.server_url.value, "http://localhost:8080");
        assert_eq!(config.server_url.source, ConfigSource::Default);
        assert_eq!(config.settle_delay_ms.value, 500);
        assert_eq!(config.request_timeout_ms.value, 10_000);
        assert_eq!(config.history_days.value, 7);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "server_url: https://log.example.com").unwrap();
        writeln!(file, "api_key: secret").unwrap();
        writeln!(file, "user_id: alice").unwrap();
        writeln!(file, "settle_delay_ms: 250").unwrap();
        writeln!(file, "history_days: 14").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(config.server_url.value, "https://log.example.com");
        assert_eq!(config.server_url.source, ConfigSource::File);
        assert_eq!(config.require_user_id().unwrap(), "alice");
        assert_eq!(config.config_file, Some(config_path));

        let options = config.ledger_options();
        assert_eq!(options.settle_delay, Duration::from_millis(250));
        assert_eq!(options.history_days, 14);
        assert_eq!(config.request_timeout_ms.source, ConfigSource::Default);

        let store = config.store().unwrap();
        assert_eq!(store.server_url(), "https://log.example.com");
    }

    #[test]
    #[ignore] // Run with --ignored; env vars can pollute parallel tests
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "user_id: fromfile").unwrap();

        std::env::set_var("NUTRILOG_USER_ID", "fromenv");
        std::env::set_var("NUTRILOG_FEED_DEBOUNCE_MS", "75");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.user_id.value.as_deref(), Some("fromenv"));
        assert_eq!(config.user_id.source, ConfigSource::Environment);
        assert_eq!(
            config.listener_options().debounce,
            Duration::from_millis(75)
        );

        std::env::remove_var("NUTRILOG_USER_ID");
        std::env::remove_var("NUTRILOG_FEED_DEBOUNCE_MS");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_zero_history_rejected() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "history_days: 0").unwrap();

        let err = Config::load(Some(config_path)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("history_days", _)));
    }

    #[test]
    fn test_missing_credentials() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "server_url: http://localhost:9000").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        let err = config.store().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("api_key")));
        assert!(err.to_string().contains("NUTRILOG_API_KEY"));
        assert!(matches!(
            config.require_user_id(),
            Err(ConfigError::Missing("user_id"))
        ));
    }
}
