//! Configuration loading, validation, and management for PulseChat.
//!
//! Loads configuration from `~/.pulsechat/config.toml` with environment
//! variable overrides. Validates all settings at startup. The language-model
//! credential is mandatory for anything that talks to the model; its absence
//! is reported by [`AppConfig::require_api_key`] before any request is served.

use pulsechat_core::provider::SamplingConfig;
use pulsechat_core::DEFAULT_HISTORY_CAP;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.pulsechat/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Credential for the language-model service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Language-model endpoint settings
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Sampling policy sent with every completion
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Conversation history settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Entity database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// HTTP gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("sampling", &self.sampling)
            .field("history", &self.history)
            .field("database", &self.database)
            .field("gateway", &self.gateway)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Display name used in logs
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Per-attempt timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts after the first one fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_provider_name() -> String {
    "openai".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_max_messages() -> usize {
    DEFAULT_HISTORY_CAP
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://pulsechat.db".into()
}
fn default_max_connections() -> u32 {
    4
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.pulsechat/config.toml).
    ///
    /// Environment overrides:
    /// - `PULSECHAT_API_KEY`, then `OPENAI_API_KEY` (only when the file has no key)
    /// - `PULSECHAT_MODEL`
    /// - `PULSECHAT_BASE_URL`
    /// - `PULSECHAT_DATABASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("PULSECHAT_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(model) = lookup("PULSECHAT_MODEL") {
            self.provider.model = model;
        }
        if let Some(base_url) = lookup("PULSECHAT_BASE_URL") {
            self.provider.base_url = base_url;
        }
        if let Some(url) = lookup("PULSECHAT_DATABASE_URL") {
            self.database.url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".pulsechat")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sampling = &self.sampling;
        if !(0.0..=2.0).contains(&sampling.temperature) {
            return Err(ConfigError::ValidationError(
                "sampling.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if !(sampling.top_p > 0.0 && sampling.top_p <= 1.0) {
            return Err(ConfigError::ValidationError(
                "sampling.top_p must be in (0.0, 1.0]".into(),
            ));
        }
        for (name, value) in [
            ("frequency_penalty", sampling.frequency_penalty),
            ("presence_penalty", sampling.presence_penalty),
        ] {
            if !(-2.0..=2.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "sampling.{name} must be between -2.0 and 2.0"
                )));
            }
        }
        if sampling.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "sampling.max_tokens must be > 0".into(),
            ));
        }
        if self.history.max_messages == 0 {
            return Err(ConfigError::ValidationError(
                "history.max_messages must be > 0".into(),
            ));
        }
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "provider.timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// The language-model credential, or the fatal configuration error.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error(
        "No language-model API key configured: set PULSECHAT_API_KEY or OPENAI_API_KEY, or api_key in config.toml"
    )]
    MissingApiKey,
}
