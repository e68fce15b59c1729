use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variables checked for the API key, in priority order.
/// A non-empty value overrides `api.key` from config.toml.
pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyFilter {
    /// Block nothing (BLOCK_NONE) -- least restrictive
    Off,
    /// Block only high-probability harmful content
    BlockHigh,
    /// Block medium and above
    BlockMedium,
    /// Block low and above -- most restrictive
    BlockLow,
}

impl SafetyFilter {
    /// Returns the Gemini API threshold string.
    pub fn as_api_str(self) -> &'static str {
        match self {
            Self::Off => "BLOCK_NONE",
            Self::BlockHigh => "BLOCK_ONLY_HIGH",
            Self::BlockMedium => "BLOCK_MEDIUM_AND_ABOVE",
            Self::BlockLow => "BLOCK_LOW_AND_ABOVE",
        }
    }
}

fn default_safety_filter() -> SafetyFilter { SafetyFilter::BlockMedium }

#[derive(Deserialize, Clone, Debug)]
pub struct ApiConfig {
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Gemini REST root, without the `/models/...` part.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Upper bound for a whole extraction request, body included. 0 disables it.
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
    /// Chat streams are only bounded at connect time; a long answer may stream for a while.
    /// 0 disables it.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_safety_filter")]
    pub safety_filter: SafetyFilter,
}

/// Seconds to a timeout, where 0 means unbounded.
fn bounded(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl ApiConfig {
    pub fn timeout(&self) -> Option<Duration> {
        bounded(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        bounded(self.connect_timeout_secs)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct FetchConfig {
    /// 0 disables it.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Image URLs answering with more than this many bytes are rejected.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl FetchConfig {
    pub fn timeout(&self) -> Option<Duration> {
        bounded(self.timeout_secs)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,
    /// Directory for plant-companion.log. Logs go to stderr when omitted.
    pub directory: Option<PathBuf>,
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_logging_enabled() -> bool { true }
fn default_level() -> String { "info".into() }

fn default_model() -> String { "gemini-3-pro-preview".into() }
fn default_base_url() -> String { "https://generativelanguage.googleapis.com/v1beta".into() }
fn default_api_timeout() -> u64 { 60 }
fn default_connect_timeout() -> u64 { 10 }
fn default_fetch_timeout() -> u64 { 20 }
fn default_max_bytes() -> usize { 20 * 1024 * 1024 }

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_api_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            safety_filter: default_safety_filter(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            directory: None,
            level: default_level(),
        }
    }
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load config.toml from `path`, falling back to defaults when the file does
    /// not exist. The API key environment override is applied either way.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "[plant-companion] config.toml not found at {}, using defaults",
                    path.display()
                );
                Config::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply overrides from a variable lookup. Split out from `load` so tests
    /// don't have to touch the process environment.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let key = API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty());
        if let Some(key) = key {
            self.api.key = key;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.api.model, "gemini-3-pro-preview");
        assert_eq!(config.api.safety_filter, SafetyFilter::BlockMedium);
        assert_eq!(config.fetch.max_bytes, 20 * 1024 * 1024);
        assert!(config.logging.enabled);
        assert!(config.logging.directory.is_none());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml_str(
            r#"
            [api]
            key = "from-file"
            safety_filter = "block_high"

            [logging]
            directory = "/tmp/plant-logs"
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.api.key, "from-file");
        assert_eq!(config.api.safety_filter.as_api_str(), "BLOCK_ONLY_HIGH");
        assert_eq!(config.api.timeout_secs, 60);
        assert_eq!(config.logging.directory, Some(PathBuf::from("/tmp/plant-logs")));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(matches!(
            Config::from_toml_str("[api\nkey = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn env_key_overrides_file_key() {
        let mut config = Config::from_toml_str("[api]\nkey = \"from-file\"").unwrap();
        config.apply_env_overrides(|name| match name {
            "GEMINI_API_KEY" => Some("  ".into()),
            "API_KEY" => Some("from-env".into()),
            _ => None,
        });
        assert_eq!(config.api.key, "from-env");
    }

    #[test]
    fn missing_env_keeps_file_key() {
        let mut config = Config::from_toml_str("[api]\nkey = \"from-file\"").unwrap();
        config.apply_env_overrides(|_| None);
        assert_eq!(config.api.key, "from-file");
    }

    #[test]
    fn zero_timeouts_mean_unbounded() {
        let config = Config::from_toml_str(
            "[api]\ntimeout_secs = 0\nconnect_timeout_secs = 0\n[fetch]\ntimeout_secs = 0",
        )
        .unwrap();
        assert_eq!(config.api.timeout(), None);
        assert_eq!(config.api.connect_timeout(), None);
        assert_eq!(config.fetch.timeout(), None);

        let defaults = Config::default();
        assert_eq!(defaults.api.timeout(), Some(Duration::from_secs(60)));
        assert_eq!(defaults.api.connect_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(defaults.fetch.timeout(), Some(Duration::from_secs(20)));
    }

    #[test]
    fn base_url_can_point_elsewhere() {
        let config = Config::from_toml_str("[api]\nbase_url = \"http://127.0.0.1:8080/v1beta\"").unwrap();
        assert_eq!(config.api.base_url, "http://127.0.0.1:8080/v1beta");
        assert!(Config::default().api.base_url.starts_with("https://generativelanguage.googleapis.com/"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.fetch.timeout_secs, 20);
    }
}
