//! Configuration loading, validation, and management for Parley.
//!
//! Loads configuration from `~/.parley/config.toml`, applies environment
//! variable overrides, then validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Assistant backend settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Context window bounds
    #[serde(default)]
    pub context: ContextConfig,

    /// HTTP / WebSocket server settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Chat history persistence
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Input limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Log at debug level unless RUST_LOG says otherwise
    #[serde(default)]
    pub verbose: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("llm", &self.llm)
            .field("context", &self.context)
            .field("gateway", &self.gateway)
            .field("memory", &self.memory)
            .field("limits", &self.limits)
            .field("verbose", &self.verbose)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Backend root; requests go to `<base_url>/api/chat`
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Deadline for one whole backend call, connect through end of stream
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Seeded as the only message of a fresh room's context window
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_llm_base_url() -> String {
    "http://localhost:11434".into()
}
fn default_llm_model() -> String {
    "llama3.2".into()
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_system_prompt() -> String {
    "You are a helpful assistant taking part in a chat room. \
     Answer the participant directly and concisely."
        .into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            request_timeout_secs: default_request_timeout_secs(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("system_prompt_chars", &self.system_prompt.chars().count())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_max_messages() -> usize {
    20
}
fn default_max_tokens() -> usize {
    2048
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origin for the socket and REST routes; `*` allows any
    #[serde(default = "default_socket_origin")]
    pub socket_origin: String,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    3000
}
fn default_socket_origin() -> String {
    "*".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            socket_origin: default_socket_origin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "sqlite", "in_memory", or "none"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// SQLite database file; defaults to `~/.parley/history.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_memory_backend() -> String {
    "sqlite".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
        }
    }
}

impl MemoryConfig {
    /// The configured database path, or the default under the config dir.
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("history.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

fn default_max_message_length() -> usize {
    10_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
        }
    }
}

const MEMORY_BACKENDS: &[&str] = &["sqlite", "in_memory", "none"];

impl AppConfig {
    /// Load configuration from the default path (~/.parley/config.toml),
    /// then apply environment overrides:
    ///
    /// - `SERVER_ADDRESS`, `SERVER_PORT`, `SOCKET_ORIGIN`
    /// - `PARLEY_LLM_URL`, or `LLM_HOST` + `LLM_PORT`
    /// - `LLM_MODEL`, `PARLEY_DB_PATH`, `VERBOSE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SERVER_ADDRESS") {
            self.gateway.host = host;
        }

        if let Some(port) = lookup("SERVER_PORT") {
            self.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("SERVER_PORT is not a valid port: {port}"))
            })?;
        }

        if let Some(origin) = lookup("SOCKET_ORIGIN") {
            self.gateway.socket_origin = origin;
        }

        if let Some(url) = lookup("PARLEY_LLM_URL") {
            self.llm.base_url = url;
        } else if let Some(port) = lookup("LLM_PORT") {
            let port: u16 = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("LLM_PORT is not a valid port: {port}"))
            })?;
            let host = lookup("LLM_HOST").unwrap_or_else(|| "localhost".into());
            self.llm.base_url = format!("http://{host}:{port}");
        }

        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }

        if let Some(path) = lookup("PARLEY_DB_PATH") {
            self.memory.path = Some(path);
        }

        if let Some(verbose) = lookup("VERBOSE") {
            match verbose.as_str() {
                "true" => self.verbose = true,
                "false" => self.verbose = false,
                other => {
                    tracing::warn!(value = %other, "VERBOSE not recognized, leaving it off");
                    self.verbose = false;
                }
            }
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context.max_messages == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_messages must be at least 1".into(),
            ));
        }

        if self.context.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_tokens must be at least 1".into(),
            ));
        }

        if self.llm.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "llm.request_timeout_secs must be at least 1".into(),
            ));
        }

        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("llm.model must be set".into()));
        }

        if !MEMORY_BACKENDS.contains(&self.memory.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "memory.backend must be one of {MEMORY_BACKENDS:?}, got '{}'",
                self.memory.backend
            )));
        }

        if self.limits.max_message_length == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_message_length must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            context: ContextConfig::default(),
            gateway: GatewayConfig::default(),
            memory: MemoryConfig::default(),
            limits: LimitsConfig::default(),
            verbose: false,
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
}
