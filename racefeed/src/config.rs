//! INI configuration file.
//!
//! Located at `~/.config/racefeed/config.ini` on Linux (via [`dirs::config_dir`]).
//!
//! ```ini
//! [server]
//! bind = 127.0.0.1:3000
//! poll_interval_ms = 100
//! read_timeout_ms = 2000
//! overlap = skip
//! channel_capacity = 64
//!
//! [store]
//! path = /var/lib/racefeed/races.json
//!
//! [roster]
//! drivers = Max Verstappen, Lando Norris, Oscar Piastri
//!
//! [client]
//! url = http://127.0.0.1:3000/api
//!
//! [logging]
//! level = info
//! directory = /var/log/racefeed
//! ```
//!
//! Every key is optional; missing keys take the defaults below.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;
use tracing::debug;

use crate::logging::LoggingConfig;
use crate::publisher::{
    OverlapPolicy, PublisherConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_POLL_INTERVAL,
    DEFAULT_READ_TIMEOUT, MAX_CHANNEL_CAPACITY,
};
use crate::roster::Roster;

/// Default server bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Default API root the client connects to.
pub const DEFAULT_CLIENT_URL: &str = "http://127.0.0.1:3000/api";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors reading, writing, or editing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),
}

impl ConfigError {
    fn invalid(key: ConfigKey, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.name().to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Path of the default configuration file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("racefeed")
        .join("config.ini")
}

// =============================================================================
// Sections
// =============================================================================

/// `[server]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub bind: String,
    pub poll_interval: Duration,
    pub read_timeout: Duration,
    pub overlap: OverlapPolicy,
    pub channel_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            overlap: OverlapPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// `[store]` section. No path means an empty in-memory store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSettings {
    pub path: Option<PathBuf>,
}

/// `[client]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub url: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CLIENT_URL.to_string(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
        }
    }
}

// =============================================================================
// ConfigFile
// =============================================================================

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub roster: Roster,
    pub client: ClientSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load from the default path, or defaults if the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`, or defaults if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut config = Self::default();
        for key in ConfigKey::all() {
            let value = ini
                .section(Some(key.section()))
                .and_then(|section| section.get(key.key_name()));
            if let Some(value) = value {
                key.set(&mut config, value)?;
            }
        }

        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Save to the default path.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section()))
                    .set(key.key_name(), value);
            }
        }

        ini.write_to_file(path).map_err(write_err)
    }

    /// Publisher settings from the `[server]` section.
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig::default()
            .with_poll_interval(self.server.poll_interval)
            .with_read_timeout(self.server.read_timeout)
            .with_overlap(self.server.overlap)
            .with_channel_capacity(self.server.channel_capacity)
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.logging.level.clone(),
            directory: self.logging.directory.clone(),
        }
    }
}

// =============================================================================
// ConfigKey
// =============================================================================

/// A single `section.key` setting, addressable from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    ServerBind,
    ServerPollIntervalMs,
    ServerReadTimeoutMs,
    ServerOverlap,
    ServerChannelCapacity,
    StorePath,
    RosterDrivers,
    ClientUrl,
    LoggingLevel,
    LoggingDirectory,
}

impl ConfigKey {
    /// All keys, grouped by section in file order.
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::ServerBind,
            ConfigKey::ServerPollIntervalMs,
            ConfigKey::ServerReadTimeoutMs,
            ConfigKey::ServerOverlap,
            ConfigKey::ServerChannelCapacity,
            ConfigKey::StorePath,
            ConfigKey::RosterDrivers,
            ConfigKey::ClientUrl,
            ConfigKey::LoggingLevel,
            ConfigKey::LoggingDirectory,
        ]
    }

    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::ServerBind
            | ConfigKey::ServerPollIntervalMs
            | ConfigKey::ServerReadTimeoutMs
            | ConfigKey::ServerOverlap
            | ConfigKey::ServerChannelCapacity => "server",
            ConfigKey::StorePath => "store",
            ConfigKey::RosterDrivers => "roster",
            ConfigKey::ClientUrl => "client",
            ConfigKey::LoggingLevel | ConfigKey::LoggingDirectory => "logging",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            ConfigKey::ServerBind => "bind",
            ConfigKey::ServerPollIntervalMs => "poll_interval_ms",
            ConfigKey::ServerReadTimeoutMs => "read_timeout_ms",
            ConfigKey::ServerOverlap => "overlap",
            ConfigKey::ServerChannelCapacity => "channel_capacity",
            ConfigKey::StorePath => "path",
            ConfigKey::RosterDrivers => "drivers",
            ConfigKey::ClientUrl => "url",
            ConfigKey::LoggingLevel => "level",
            ConfigKey::LoggingDirectory => "directory",
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as a string; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        let path_string = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };

        match self {
            ConfigKey::ServerBind => config.server.bind.clone(),
            ConfigKey::ServerPollIntervalMs => config.server.poll_interval.as_millis().to_string(),
            ConfigKey::ServerReadTimeoutMs => config.server.read_timeout.as_millis().to_string(),
            ConfigKey::ServerOverlap => config.server.overlap.as_str().to_string(),
            ConfigKey::ServerChannelCapacity => config.server.channel_capacity.to_string(),
            ConfigKey::StorePath => path_string(&config.store.path),
            ConfigKey::RosterDrivers => config.roster.to_config_value(),
            ConfigKey::ClientUrl => config.client.url.clone(),
            ConfigKey::LoggingLevel => config.logging.level.clone(),
            ConfigKey::LoggingDirectory => path_string(&config.logging.directory),
        }
    }

    /// Validate and store `value`.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        let optional_path = |v: &str| (!v.is_empty()).then(|| PathBuf::from(v));

        match self {
            ConfigKey::ServerBind => {
                if value.is_empty() {
                    return Err(ConfigError::invalid(*self, value, "must not be empty"));
                }
                config.server.bind = value.to_string();
            }
            ConfigKey::ServerPollIntervalMs => {
                config.server.poll_interval = Duration::from_millis(self.positive(value)?);
            }
            ConfigKey::ServerReadTimeoutMs => {
                config.server.read_timeout = Duration::from_millis(self.positive(value)?);
            }
            ConfigKey::ServerOverlap => {
                config.server.overlap = value
                    .parse()
                    .map_err(|e: String| ConfigError::invalid(*self, value, e))?;
            }
            ConfigKey::ServerChannelCapacity => {
                let capacity = self.positive(value)?;
                if capacity > MAX_CHANNEL_CAPACITY as u64 {
                    return Err(ConfigError::invalid(
                        *self,
                        value,
                        format!("must be at most {}", MAX_CHANNEL_CAPACITY),
                    ));
                }
                config.server.channel_capacity = capacity as usize;
            }
            ConfigKey::StorePath => config.store.path = optional_path(value),
            ConfigKey::RosterDrivers => {
                config.roster = match value.parse() {
                    Ok(roster) => roster,
                    Err(never) => match never {},
                };
            }
            ConfigKey::ClientUrl => {
                if !(value.starts_with("http://") || value.starts_with("https://")) {
                    return Err(ConfigError::invalid(
                        *self,
                        value,
                        "must start with http:// or https://",
                    ));
                }
                config.client.url = value.to_string();
            }
            ConfigKey::LoggingLevel => {
                let level = value.to_lowercase();
                if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
                    return Err(ConfigError::invalid(
                        *self,
                        value,
                        "expected trace, debug, info, warn, or error",
                    ));
                }
                config.logging.level = level;
            }
            ConfigKey::LoggingDirectory => config.logging.directory = optional_path(value),
        }
        Ok(())
    }

    fn positive(&self, value: &str) -> Result<u64, ConfigError> {
        match value.parse::<u64>() {
            Ok(0) => Err(ConfigError::invalid(*self, value, "must be greater than zero")),
            Ok(n) => Ok(n),
            Err(e) => Err(ConfigError::invalid(*self, value, e.to_string())),
        }
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ConfigKey::all()
            .iter()
            .copied()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}
