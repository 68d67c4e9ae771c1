//! Configuration file parser for ~/.config/lifefeed/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning for each one
//! since they are usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Engine and API client configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// `api_token` is masked in the `Debug` output.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the feed API.
    pub api_base_url: String,

    /// Bearer token passed through to the API (env `LIFEFEED_API_TOKEN` wins).
    #[serde(deserialize_with = "deserialize_secret")]
    pub api_token: Option<SecretString>,

    /// Feed context opened by the CLI when none is given.
    pub default_context: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Retries for read requests after a transient failure.
    pub max_retries: u32,

    /// Maximum number of detail records kept in memory.
    pub detail_cache_capacity: usize,

    /// Buffered change events per subscriber before it lags.
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            api_token: None,
            default_context: "main".to_string(),
            request_timeout_secs: 20,
            max_retries: 3,
            detail_cache_capacity: 256,
            event_buffer: 256,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("default_context", &self.default_context)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("detail_cache_capacity", &self.detail_cache_capacity)
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(SecretString::from))
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "api_base_url",
        "api_token",
        "default_context",
        "request_timeout_secs",
        "max_retries",
        "detail_cache_capacity",
        "event_buffer",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            base_url = %config.api_base_url,
            context = %config.default_context,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Env var `LIFEFEED_API_TOKEN` takes precedence over the file.
    pub fn apply_env(mut self) -> Self {
        if let Ok(token) = std::env::var("LIFEFEED_API_TOKEN") {
            if !token.trim().is_empty() {
                self.api_token = Some(SecretString::from(token));
            }
        }
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
