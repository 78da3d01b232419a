//! Configuration system for Sluice.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SLUICE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/sluice/config.toml
//!   3. ~/.config/sluice/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::{
    DEFAULT_WINDOW, HANDSHAKE_BACKOFF_MS, HANDSHAKE_RETRIES, TICK_INTERVAL_MS, TRANSFER_RETRIES,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    pub network: NetworkConfig,
    pub transfer: TransferConfig,
    pub serve: ServeConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the serving socket binds to.
    pub bind_addr: String,
    /// UDP port the server listens on.
    pub listen_port: u16,
}

/// Protocol timing and window parameters, shared by both roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Segments a window may hold at once.
    pub window_size: usize,
    /// Sender retransmission tick.
    pub tick_interval_ms: u64,
    /// Attempts per handshake step before giving up.
    pub handshake_retries: u32,
    /// Wait between handshake attempts.
    pub handshake_backoff_ms: u64,
    /// Consecutive intervals without progress before a transfer is abandoned.
    pub transfer_retries: u32,
    /// How long a finished receiver keeps re-acknowledging stragglers.
    pub linger_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Directory requested names are resolved against.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Whole-transfer attempts before reporting failure. Minimum 1.
    pub attempts: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            listen_port: 2876,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW,
            tick_interval_ms: TICK_INTERVAL_MS,
            handshake_retries: HANDSHAKE_RETRIES,
            handshake_backoff_ms: HANDSHAKE_BACKOFF_MS,
            transfer_retries: TRANSFER_RETRIES,
            linger_ms: 3 * HANDSHAKE_BACKOFF_MS,
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("files"),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { attempts: 1 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("sluice")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("sluice")
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
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SluiceConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            SluiceConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config document. Missing sections and keys take defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SLUICE_CONFIG")
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
            let text = toml::to_string_pretty(&SluiceConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.window_size == 0 {
            return Err(ConfigError::Invalid(
                "transfer.window_size",
                "must be at least 1".into(),
            ));
        }
        if self.transfer.tick_interval_ms == 0 || self.transfer.handshake_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "transfer intervals",
                "must be non-zero".into(),
            ));
        }
        if self.transfer.handshake_retries == 0 {
            return Err(ConfigError::Invalid(
                "transfer.handshake_retries",
                "must be at least 1".into(),
            ));
        }
        if self.transfer.transfer_retries == 0 {
            return Err(ConfigError::Invalid(
                "transfer.transfer_retries",
                "must be at least 1".into(),
            ));
        }
        if self.fetch.attempts == 0 {
            return Err(ConfigError::Invalid(
                "fetch.attempts",
                "must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Apply SLUICE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SLUICE_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Ok(v) = std::env::var("SLUICE_NETWORK__LISTEN_PORT") {
            if let Ok(p) = v.parse() {
                self.network.listen_port = p;
            }
        }
        if let Ok(v) = std::env::var("SLUICE_TRANSFER__WINDOW_SIZE") {
            if let Ok(w) = v.parse() {
                self.transfer.window_size = w;
            }
        }
        if let Ok(v) = std::env::var("SLUICE_TRANSFER__TICK_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.transfer.tick_interval_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("SLUICE_TRANSFER__HANDSHAKE_RETRIES") {
            if let Ok(n) = v.parse() {
                self.transfer.handshake_retries = n;
            }
        }
        if let Ok(v) = std::env::var("SLUICE_SERVE__ROOT") {
            self.serve.root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SLUICE_FETCH__ATTEMPTS") {
            if let Ok(n) = v.parse() {
                self.fetch.attempts = n;
            }
        }
    }
}
