use chrono::TimeDelta;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use url::Url;

use crate::models::{Participant, SenderRole};

const ENV_PARTICIPANT_ID: &str = "BAZAAR_CHAT_PARTICIPANT_ID";
const ENV_ROLE: &str = "BAZAAR_CHAT_ROLE";
const ENV_API_URL: &str = "BAZAAR_CHAT_API_URL";
const ENV_SOCKET_URL: &str = "BAZAAR_CHAT_SOCKET_URL";
const ENV_TOKEN: &str = "BAZAAR_CHAT_TOKEN";
const ENV_LOG_LEVEL: &str = "BAZAAR_CHAT_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "BAZAAR_CHAT_LOG_FORMAT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported configuration format. Use 'yaml' or 'json'.")]
    UnsupportedFormat,
    #[error("Invalid {name} value: {reason}")]
    InvalidEnv { name: &'static str, reason: String },
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Identity of the participant the session registers as.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ParticipantConfig {
    pub id: String,
    pub role: SenderRole,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            role: SenderRole::Customer,
        }
    }
}

/// Remote endpoints. Credentials travel out-of-band as a bearer token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the chat REST API (`conversations`, `messages`).
    pub api_base_url: Url,
    /// URL of the persistent chat connection.
    pub socket_url: Url,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse("http://localhost:8080/api/chat/")
                .expect("static API URL is valid"),
            socket_url: Url::parse("ws://localhost:8080/chat").expect("static socket URL is valid"),
            auth_token: None,
        }
    }
}

/// Tunables of the synchronization engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a request waits for its acknowledgment.
    pub request_timeout_ms: u64,
    /// Tolerance when matching a pending message against its confirmed copy.
    pub supersede_window_ms: u64,
    /// Parallel `getConversation` calls while preloading the panel.
    pub preload_concurrency: usize,
    /// Capacity of the session event fan-out.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 15_000,
            supersede_window_ms: 5_000,
            preload_concurrency: 4,
            event_buffer: 256,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn supersede_window(&self) -> TimeDelta {
        TimeDelta::milliseconds(i64::try_from(self.supersede_window_ms).unwrap_or(i64::MAX / 2))
    }
}

/// Backoff applied by the transport between connection attempts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt number `attempt` (0-based), doubling up
    /// to the configured ceiling.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1_u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Advisory warm-start cache on local disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
        }
    }
}

impl StorageConfig {
    /// Configured directory, or the platform data directory.
    #[must_use]
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            ProjectDirs::from("com", "bazaar", "bazaar-chat").map_or_else(
                || PathBuf::from("./.bazaar-chat"),
                |dirs| dirs.data_dir().to_path_buf(),
            )
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err("must be 'text' or 'json'"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Values supplied on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub participant_id: Option<String>,
    pub role: Option<SenderRole>,
    pub api_base_url: Option<Url>,
    pub socket_url: Option<Url>,
    pub log_level: Option<String>,
}

/// The main configuration structure for a Bazaar Chat client.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub participant: ParticipantConfig,
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub reconnect: ReconnectConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Precedence, lowest first: defaults, file, `BAZAAR_CHAT_*` variables,
    /// `overrides`.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when the file cannot be read or parsed, an
    /// environment variable is malformed, or validation fails.
    pub fn load_config(
        config_path: Option<PathBuf>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::with_defaults(),
        };

        config.apply_env_overrides()?;
        config.apply_overrides(overrides);

        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        match extension.as_deref() {
            Some("yaml" | "yml") => Ok(serde_yml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Err(ConfigError::UnsupportedFormat),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(id) = env::var(ENV_PARTICIPANT_ID) {
            self.participant.id = id;
        }
        if let Ok(role) = env::var(ENV_ROLE) {
            self.participant.role = role.parse().map_err(|reason: &str| ConfigError::InvalidEnv {
                name: ENV_ROLE,
                reason: reason.to_string(),
            })?;
        }
        if let Ok(url) = env::var(ENV_API_URL) {
            self.server.api_base_url = parse_env_url(ENV_API_URL, &url)?;
        }
        if let Ok(url) = env::var(ENV_SOCKET_URL) {
            self.server.socket_url = parse_env_url(ENV_SOCKET_URL, &url)?;
        }
        if let Ok(token) = env::var(ENV_TOKEN) {
            self.server.auth_token = Some(token).filter(|token| !token.is_empty());
        }
        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Ok(format) = env::var(ENV_LOG_FORMAT) {
            self.logging.format =
                format
                    .parse()
                    .map_err(|reason: &str| ConfigError::InvalidEnv {
                        name: ENV_LOG_FORMAT,
                        reason: reason.to_string(),
                    })?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(id) = overrides.participant_id {
            self.participant.id = id;
        }
        if let Some(role) = overrides.role {
            self.participant.role = role;
        }
        if let Some(url) = overrides.api_base_url {
            self.server.api_base_url = url;
        }
        if let Some(url) = overrides.socket_url {
            self.server.socket_url = url;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    /// Validate the complete configuration.
    ///
    /// # Errors
    /// Returns every problem found, not just the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.participant.id.trim().is_empty() {
            errors.push("participant id must not be empty".to_string());
        }
        if !matches!(self.server.socket_url.scheme(), "ws" | "wss") {
            errors.push(format!(
                "socket URL must use ws or wss, got {}",
                self.server.socket_url.scheme()
            ));
        }
        if self.server.api_base_url.cannot_be_a_base() {
            errors.push("API base URL cannot be used as a base".to_string());
        }
        if self.sync.request_timeout_ms == 0 {
            errors.push("request timeout must be greater than 0".to_string());
        }
        if self.sync.preload_concurrency == 0 {
            errors.push("preload concurrency must be greater than 0".to_string());
        }
        if self.sync.event_buffer == 0 {
            errors.push("event buffer must be greater than 0".to_string());
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            errors.push("reconnect initial delay exceeds max delay".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn participant(&self) -> Participant {
        Participant::new(self.participant.id.clone(), self.participant.role)
    }
}

fn parse_env_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|err| ConfigError::InvalidEnv {
        name,
        reason: err.to_string(),
    })
}
