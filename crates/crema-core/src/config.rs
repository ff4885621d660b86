//! Configuration system for crema.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CREMA_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/crema/config.toml
//!   3. ~/.config/crema/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::address::{AddressError, AddressFilter, DEFAULT_PRIVATE_RANGES};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CremaConfig {
    pub feed: FeedConfig,
    pub league: LeagueConfig,
    pub probe: ProbeConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Server-sent event stream of game creations, updates and deletions.
    pub events_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeagueConfig {
    /// Endpoint queried for a game's advertised addresses.
    pub query_url: String,
    /// League address game clients connect to. Passed through to API clients.
    pub client_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Upper bound for a single reachability check.
    pub timeout_ms: u64,
    /// Delay between hole-punching probes.
    pub punch_interval_ms: u64,
    /// Skip loopback, link-local and private addresses.
    pub skip_private: bool,
    /// CIDR blocks skipped when `skip_private` is set.
    pub private_ranges: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address of the HTTP API.
    pub listen: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            events_url: "https://league.clonkspot.org/game_events".to_string(),
        }
    }
}

impl Default for LeagueConfig {
    fn default() -> Self {
        Self {
            query_url: "https://league.clonkspot.org/league.php".to_string(),
            client_address: "league.clonkspot.org:80".to_string(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            punch_interval_ms: 100,
            skip_private: true,
            private_ranges: DEFAULT_PRIVATE_RANGES.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn punch_interval(&self) -> Duration {
        Duration::from_millis(self.punch_interval_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("crema")
}

fn home_dir() -> PathBuf {
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
    #[error("probe.private_ranges: {0}")]
    InvalidRange(#[from] AddressError),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CremaConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read the given file, or defaults if it does not exist.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(CremaConfig::default());
        }
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CREMA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text =
            toml::to_string_pretty(&CremaConfig::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply overrides. `ADDRESS` is the historical name of the listen
    /// address variable; the rest follow CREMA_<SECTION>__<KEY>.
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("ADDRESS") {
            self.api.listen = v;
        }
        if let Some(v) = var("CREMA_FEED__EVENTS_URL") {
            self.feed.events_url = v;
        }
        if let Some(v) = var("CREMA_LEAGUE__QUERY_URL") {
            self.league.query_url = v;
        }
        if let Some(v) = var("CREMA_PROBE__TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.probe.timeout_ms = ms;
            }
        }
        if let Some(v) = var("CREMA_PROBE__SKIP_PRIVATE") {
            self.probe.skip_private = v == "true" || v == "1";
        }
    }

    /// Build the probe address filter. A malformed range is fatal.
    pub fn address_filter(&self) -> Result<AddressFilter, ConfigError> {
        if !self.probe.skip_private {
            return Ok(AddressFilter::disabled());
        }
        Ok(AddressFilter::from_ranges(&self.probe.private_ranges)?)
    }
}
