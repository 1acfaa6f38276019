pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::protocol::request::{ChatMessage, ChatRequest, Role};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend list
// ---------------------------------------------------------------------------

/// Ordered list of backend base URLs.
///
/// Accepts either a YAML sequence or a single comma-separated string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BackendList(Vec<String>);

impl BackendList {
    /// Parse a comma-separated list, dropping blank entries.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<String>> for BackendList {
    fn from(urls: Vec<String>) -> Self {
        Self(
            urls.into_iter()
                .map(|url| url.trim().to_owned())
                .filter(|url| !url.is_empty())
                .collect(),
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BackendListWire {
    Csv(String),
    List(Vec<String>),
}

impl<'de> Deserialize<'de> for BackendList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match BackendListWire::deserialize(deserializer)? {
            BackendListWire::Csv(raw) => BackendList::parse(&raw),
            BackendListWire::List(urls) => BackendList::from(urls),
        })
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Total lifetime allowed for one streamed response; 0 means unbounded.
    #[serde(default)]
    pub stream_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub use_env_proxy: bool,
}

fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_pool_max_idle_per_host() -> usize {
    8
}
fn default_pool_idle_timeout_secs() -> u64 {
    90
}

impl TransportConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn stream_timeout(&self) -> Option<Duration> {
        (self.stream_timeout_secs > 0).then(|| Duration::from_secs(self.stream_timeout_secs))
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn pool_idle_timeout(&self) -> Option<Duration> {
        (self.pool_idle_timeout_secs > 0).then(|| Duration::from_secs(self.pool_idle_timeout_secs))
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            stream_timeout_secs: 0,
            request_timeout_secs: default_request_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
            use_env_proxy: false,
        }
    }
}

/// Retry policy for bounded (non-streaming) calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    #[serde(default = "default_retry_after_max_secs")]
    pub retry_after_max_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_step_ms() -> u64 {
    500
}
fn default_retry_after_max_secs() -> u64 {
    30
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_step_ms: default_backoff_step_ms(),
            retry_after_max_secs: default_retry_after_max_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Tuning for the incremental-content merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_overlap_window_chars")]
    pub overlap_window_chars: usize,
    #[serde(default = "default_recent_fragment_capacity")]
    pub recent_fragment_capacity: usize,
}

fn default_overlap_window_chars() -> usize {
    512
}
fn default_recent_fragment_capacity() -> usize {
    12
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            overlap_window_chars: default_overlap_window_chars(),
            recent_fragment_capacity: default_recent_fragment_capacity(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Provider settings the command-line client sends with each prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatProfile {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub api_address: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub use_web_search: bool,
}

impl ChatProfile {
    /// Build a single-turn request for `prompt`.
    #[must_use]
    pub fn to_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::new(Role::User, prompt)],
            provider: self.provider.clone(),
            channel: self.channel.clone(),
            api_address: self.api_address.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            use_web_search: self.use_web_search.then_some(true),
            ..ChatRequest::default()
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backends: BackendList,
    #[serde(default)]
    pub concurrent_requests_enabled: bool,
    #[serde(default)]
    pub release_urls: Vec<String>,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub chat: ChatProfile,
}

impl AppConfig {
    /// Parse and validate configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] when parsing fails or
    /// [`ConfigError::Validation`] when semantic validation fails.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(contents)?;
        validate_config(&config)?;
        Ok(config)
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    AppConfig::from_yaml_str(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert!(config.backends.len() >= 2);
        assert!(!config.concurrent_requests_enabled);
        assert_eq!(config.transport.stream_timeout(), None);
        assert_eq!(config.stream.channel_capacity, 64);
        assert_eq!(config.reconcile.overlap_window_chars, 512);
    }

    #[test]
    fn test_backend_list_accepts_comma_separated_string() {
        let config =
            AppConfig::from_yaml_str("backends: \"https://a.example/chat, ,http://127.0.0.1:8080\"\n")
                .unwrap();
        assert_eq!(
            config.backends.as_slice(),
            &[
                "https://a.example/chat".to_string(),
                "http://127.0.0.1:8080".to_string()
            ]
        );
    }

    #[test]
    fn test_backend_list_accepts_sequence() {
        let config = AppConfig::from_yaml_str(
            "backends:\n  - https://a.example\n  - https://b.example\nconcurrent_requests_enabled: true\n",
        )
        .unwrap();
        assert_eq!(config.backends.len(), 2);
        assert!(config.concurrent_requests_enabled);
    }

    #[test]
    fn test_transport_defaults() {
        let transport = TransportConfig::default();
        assert_eq!(transport.connect_timeout(), Duration::from_secs(10));
        assert_eq!(transport.stream_timeout(), None);
        assert_eq!(transport.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_log_format_serde() {
        let json = serde_json::to_string(&LogFormat::Json).unwrap();
        assert_eq!(json, "\"json\"");
        let format: LogFormat = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(format, LogFormat::Text);
    }

    #[test]
    fn test_chat_profile_to_request() {
        let profile = ChatProfile {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            use_web_search: true,
            ..ChatProfile::default()
        };
        let request = profile.to_request("hello");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].content, "hello");
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.use_web_search, Some(true));
    }
}
