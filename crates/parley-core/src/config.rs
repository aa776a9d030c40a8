//! Configuration system for Parley.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PARLEY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/parley/config.toml
//!   3. ~/.config/parley/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP port the server listens on. A port given on the command line
    /// takes precedence.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle timeout in seconds. A session with no accepted traffic for this
    /// long is reaped with a GOODBYE. Also the sweeper's pass interval.
    pub timeout_secs: u64,
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { timeout_secs: 20 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("parley")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ParleyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ParleyConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PARLEY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ParleyConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PARLEY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PARLEY_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Ok(v) = std::env::var("PARLEY_SESSION__TIMEOUT_SECS") {
            if let Ok(t) = v.parse() {
                self.session.timeout_secs = t;
            }
        }
    }
}
