//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use harvest_core::DEFAULT_HEARTBEAT_TTL_MS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default address the daemon listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8014";

/// Longest allowed gap between stale-session checks: one day.
pub const MAX_HEARTBEAT_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("heartbeat_ttl_secs must be greater than zero")]
    ZeroHeartbeatTtl,
    #[error("heartbeat_interval_secs must be greater than zero")]
    ZeroHeartbeatInterval,
    #[error("heartbeat_interval_secs must be at most {MAX_HEARTBEAT_INTERVAL_SECS}, got {0}")]
    HeartbeatIntervalTooLong(u64),
    #[error("listen_addr cannot be empty")]
    EmptyListenAddr,
}

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Address the daemon listens on, and `send` connects to.
    pub listen_addr: String,
    /// Seconds without heartbeats before a session is closed as abandoned.
    pub heartbeat_ttl_secs: u64,
    /// Seconds between stale-session checks.
    pub heartbeat_interval_secs: u64,
    /// Save the in-flight session when the daemon stops.
    pub flush_on_shutdown: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("listen_addr", &self.listen_addr)
            .field("heartbeat_ttl_secs", &self.heartbeat_ttl_secs)
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("flush_on_shutdown", &self.flush_on_shutdown)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("harvest.db"),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            heartbeat_ttl_secs: (DEFAULT_HEARTBEAT_TTL_MS / 1000).unsigned_abs(),
            heartbeat_interval_secs: 10,
            flush_on_shutdown: true,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (HARVEST_*)
        figment = figment.merge(Env::prefixed("HARVEST_"));

        figment.extract()
    }

    /// Checks the values the daemon depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_ttl_secs == 0 {
            return Err(ConfigError::ZeroHeartbeatTtl);
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        if self.heartbeat_interval_secs > MAX_HEARTBEAT_INTERVAL_SECS {
            return Err(ConfigError::HeartbeatIntervalTooLong(
                self.heartbeat_interval_secs,
            ));
        }
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::EmptyListenAddr);
        }
        Ok(())
    }

    pub fn heartbeat_ttl_ms(&self) -> i64 {
        i64::try_from(self.heartbeat_ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Returns the platform-specific config directory for harvest.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("harvest"))
}

/// Returns the platform-specific data directory for harvest.
///
/// On Linux: `~/.local/share/harvest`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("harvest"))
}
