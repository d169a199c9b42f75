//! Relay settings.
//!
//! Each setting is taken from the first source that provides it: command
//! line, environment (`NETPLAY_ADDR`, `NETPLAY_LOG`), the `[server]` table of
//! `~/.config/netplay-relay/config.toml`, then the built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::peer::DEFAULT_OUTBOUND_QUEUE;

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// On-disk settings. Every key is optional.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SettingsFile {
    server: ServerSettings,
}

/// `[server]` table.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSettings {
    bind_addr: Option<String>,
    max_message_size: Option<usize>,
    outbound_queue_size: Option<usize>,
    static_dir: Option<PathBuf>,
    games_dir: Option<PathBuf>,
    room_idle_timeout_secs: Option<u64>,
}

/// Command-line flags of `netplay-relay`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Netplay pairing and relay server")]
pub struct RelayCliArgs {
    /// Address to listen on.
    #[arg(short, long, env = "NETPLAY_ADDR")]
    pub bind: Option<String>,

    /// Settings file (default: `~/.config/netplay-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum size of one WebSocket message in bytes.
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Frames queued for one client before it is dropped as stalled.
    #[arg(long)]
    pub outbound_queue_size: Option<usize>,

    /// Directory holding `index.html` and the `jsnes` assets.
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Directory scanned for `.nes` ROMs.
    #[arg(long)]
    pub games_dir: Option<PathBuf>,

    /// Seconds a room may wait for a second player (0 disables expiry).
    #[arg(long)]
    pub room_idle_timeout_secs: Option<u64>,

    /// Log filter, e.g. `info` or `netplay_relay=debug`.
    #[arg(long, default_value = "info", env = "NETPLAY_LOG")]
    pub log_level: String,
}

/// Settings the server runs with.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address, `0.0.0.0:5000` unless overridden.
    pub bind_addr: String,
    /// Maximum size of one WebSocket message in bytes.
    pub max_message_size: usize,
    /// Frames queued for one client before it is dropped as stalled.
    pub outbound_queue_size: usize,
    /// Directory holding `index.html` and the `jsnes` assets.
    pub static_dir: PathBuf,
    /// Directory scanned for `.nes` ROMs.
    pub games_dir: PathBuf,
    /// Seconds a room may wait for a second player; 0 disables expiry.
    pub room_idle_timeout_secs: u64,
    /// Log filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            max_message_size: 64 * 1024,
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE,
            static_dir: PathBuf::from("."),
            games_dir: PathBuf::from("."),
            room_idle_timeout_secs: 30 * 60,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Builds the running configuration from `cli` and the settings file.
    ///
    /// A file named with `--config` must exist; the default location may be
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a settings file exists but cannot be read
    /// or parsed, or if the `--config` file is missing.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = read_settings(cli.config.as_deref())?;
        Ok(Self::merge(cli, file.server))
    }

    /// Idle timeout for waiting rooms, or `None` if expiry is disabled.
    #[must_use]
    pub const fn room_idle_timeout(&self) -> Option<Duration> {
        if self.room_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.room_idle_timeout_secs))
        }
    }

    fn merge(cli: &RelayCliArgs, file: ServerSettings) -> Self {
        let fallback = Self::default();
        Self {
            bind_addr: cli.bind.clone().or(file.bind_addr).unwrap_or(fallback.bind_addr),
            max_message_size: cli
                .max_message_size
                .or(file.max_message_size)
                .unwrap_or(fallback.max_message_size),
            outbound_queue_size: cli
                .outbound_queue_size
                .or(file.outbound_queue_size)
                .unwrap_or(fallback.outbound_queue_size),
            static_dir: cli.static_dir.clone().or(file.static_dir).unwrap_or(fallback.static_dir),
            games_dir: cli.games_dir.clone().or(file.games_dir).unwrap_or(fallback.games_dir),
            room_idle_timeout_secs: cli
                .room_idle_timeout_secs
                .or(file.room_idle_timeout_secs)
                .unwrap_or(fallback.room_idle_timeout_secs),
            log_level: cli.log_level.clone(),
        }
    }
}

/// Reads `explicit`, or the default settings file when none is given.
fn read_settings(explicit: Option<&Path>) -> Result<SettingsFile, ConfigError> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => match dirs::config_dir() {
            Some(dir) => (dir.join("netplay-relay").join("config.toml"), false),
            None => return Ok(SettingsFile::default()),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(SettingsFile::default())
        }
        Err(source) => Err(ConfigError::ReadFile { path, source }),
    }
}
