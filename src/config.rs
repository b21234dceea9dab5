//! Configuration loading and validation.

use crate::error::{ConfigError, Result};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws/acp";

/// questline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// WebSocket endpoint the ACP frames are exchanged over.
    pub server_url: String,

    /// Working directory advertised when opening new quests.
    pub cwd: PathBuf,

    /// Reconnection schedule.
    pub reconnect: ReconnectConfig,

    /// Optional `EnvFilter` directive overriding the default log level.
    pub log_filter: Option<String>,
}

/// Reconnect-with-backoff settings for the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay_ms: u64,

    /// Upper bound on any single delay.
    pub max_delay_ms: u64,

    /// Automatic attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            cwd: PathBuf::from("."),
            reconnect: ReconnectConfig::default(),
            log_filter: None,
        }
    }
}

/// On-disk TOML shape. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlConfig {
    server_url: Option<String>,
    cwd: Option<PathBuf>,
    reconnect: Option<ReconnectConfig>,
    log_filter: Option<String>,
}

impl Config {
    /// Default config file location: `<config_dir>/questline/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("questline"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Load from the default path (if present), then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_unvalidated(None)?.validated()
    }

    /// Load from a specific config file path, then apply environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        Self::load_unvalidated(Some(path))?.validated()
    }

    /// File and environment layers without [`Config::validated`], for callers
    /// that apply further overrides (CLI flags) before validating once.
    /// `None` reads the default path if it exists.
    pub fn load_unvalidated(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.with_env_overrides()
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source: Arc::new(source),
        })?;
        Self::from_toml_str(&content, path)
    }

    fn from_toml_str(content: &str, path: &Path) -> Result<Self> {
        let parsed: TomlConfig = toml::from_str(content).map_err(|error| ConfigError::Parse {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;

        let defaults = Self::default();
        Ok(Self {
            server_url: parsed.server_url.unwrap_or(defaults.server_url),
            cwd: parsed.cwd.unwrap_or(defaults.cwd),
            reconnect: parsed.reconnect.unwrap_or(defaults.reconnect),
            log_filter: parsed.log_filter,
        })
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var("QUESTLINE_URL") {
            self.server_url = url;
        }
        if let Ok(cwd) = std::env::var("QUESTLINE_CWD") {
            self.cwd = PathBuf::from(cwd);
        }
        if let Ok(raw) = std::env::var("QUESTLINE_MAX_RECONNECT_ATTEMPTS") {
            self.reconnect.max_attempts = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "QUESTLINE_MAX_RECONNECT_ATTEMPTS must be a non-negative integer, got '{raw}'"
                ))
            })?;
        }
        Ok(self)
    }

    /// Check invariants the connection manager relies on.
    pub fn validated(self) -> Result<Self> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "server_url must use ws:// or wss://, got '{}'",
                self.server_url
            ))
            .into());
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(ConfigError::Invalid("reconnect.base_delay_ms must be > 0".into()).into());
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.max_delay_ms must be >= reconnect.base_delay_ms".into(),
            )
            .into());
        }
        Ok(self)
    }
}
