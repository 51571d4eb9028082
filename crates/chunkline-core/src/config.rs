//! Configuration system for chunkline.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CHUNKLINE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/chunkline/config.toml
//!   3. ~/.config/chunkline/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::DEFAULT_MAX_FRAGMENT_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunklineConfig {
    pub fragment: FragmentConfig,
    pub session: SessionConfig,
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentConfig {
    /// Maximum body bytes per fragment, not counting the 1-byte header.
    pub max_fragment_size: usize,
    /// Upper bound on a reassembled payload.
    pub max_payload_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long discovery may run before the transfer is abandoned.
    pub discovery_timeout_ms: u64,
    /// Delay between consecutive fragment writes.
    pub pacing_ms: u64,
    /// Deadline from connect to completed response. 0 = no deadline.
    pub exchange_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Service the peer advertises; discovery is scoped to it.
    pub service: String,
    /// Endpoint the central writes request fragments to.
    pub request_endpoint: String,
    /// Endpoint the peer notifies response fragments on.
    pub response_endpoint: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            max_payload_len: 64 * 1024,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: 5_000,
            pacing_ms: 25,
            exchange_timeout_ms: 0,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            service: "193DB24F-E42E-49D2-9A70-6A5616863A9D".into(),
            request_endpoint: "43CDD5AB-3EF6-496A-A4CC-9933F5ADAF68".into(),
            response_endpoint: "F1A9A759-C922-4219-B62C-1A14F62DE0A4".into(),
        }
    }
}

impl SessionConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn exchange_timeout(&self) -> Option<Duration> {
        (self.exchange_timeout_ms > 0).then(|| Duration::from_millis(self.exchange_timeout_ms))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("chunkline")
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
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ChunklineConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            ChunklineConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CHUNKLINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    /// Write the default config to `path` unless something is already there.
    pub fn write_default_to(path: &std::path::Path) -> Result<(), ConfigError> {
        let path = path.to_path_buf();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ChunklineConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(())
    }

    /// Reject values the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fragment.max_fragment_size == 0 {
            return Err(ConfigError::Invalid(
                "fragment.max_fragment_size must be at least 1".into(),
            ));
        }
        if self.fragment.max_payload_len == 0 {
            return Err(ConfigError::Invalid(
                "fragment.max_payload_len must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Apply CHUNKLINE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_number("CHUNKLINE_SESSION__DISCOVERY_TIMEOUT_MS") {
            self.session.discovery_timeout_ms = v;
        }
        if let Some(v) = env_number("CHUNKLINE_SESSION__PACING_MS") {
            self.session.pacing_ms = v;
        }
        if let Some(v) = env_number("CHUNKLINE_SESSION__EXCHANGE_TIMEOUT_MS") {
            self.session.exchange_timeout_ms = v;
        }
        if let Some(v) = env_number("CHUNKLINE_FRAGMENT__MAX_FRAGMENT_SIZE") {
            self.fragment.max_fragment_size = v;
        }
        if let Some(v) = env_number("CHUNKLINE_FRAGMENT__MAX_PAYLOAD_LEN") {
            self.fragment.max_payload_len = v;
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric override");
            None
        }
    }
}
