//! TOML-based configuration for the daemon.
//!
//! Reads and writes `DaemonConfig` from the platform config location:
//! `$XDG_CONFIG_HOME/remoted/config.toml` (or `~/.config/remoted/`).
//!
//! Fields annotated with `#[serde(default = "...")]` fall back to their
//! defaults when absent, so a partial or missing file works on first run
//! and across upgrades.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level daemon configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DaemonConfig {
    #[serde(default)]
    pub remote: GeneralConfig,
    #[serde(default)]
    pub lirc: LircConfig,
    #[serde(default)]
    pub rcu: RcuConfig,
}

/// General daemon behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Socket (line protocol) driver settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LircConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Path of the decoder daemon's Unix socket.
    #[serde(default = "default_lirc_socket")]
    pub socket: PathBuf,
}

/// Serial (frame protocol) driver settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RcuConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Serial device the controller unit is attached to.
    #[serde(default = "default_rcu_device")]
    pub device: PathBuf,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_lirc_socket() -> PathBuf {
    PathBuf::from("/var/run/lirc/lircd")
}
fn default_rcu_device() -> PathBuf {
    PathBuf::from("/dev/ttyS1")
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { log_level: default_log_level() }
    }
}

impl Default for LircConfig {
    fn default() -> Self {
        Self { enabled: default_true(), socket: default_lirc_socket() }
    }
}

impl Default for RcuConfig {
    fn default() -> Self {
        Self { enabled: false, device: default_rcu_device() }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for daemon files.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when neither
/// `XDG_CONFIG_HOME` nor `HOME` is available.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok_or(ConfigError::NoPlatformConfigDir)?;
    Ok(base.join("remoted"))
}

/// Resolves the full path to the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the daemon config, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than
/// "not found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<DaemonConfig, ConfigError> {
    let path = config_file_path()?;
    load_config_from(path)
}

/// Loads config from an explicit path (used for `remoted <config>`).
pub fn load_config_from(path: PathBuf) -> Result<DaemonConfig, ConfigError> {
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let cfg: DaemonConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DaemonConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config`, creating the directory if needed.
pub fn save_config(config: &DaemonConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io { path, source })?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
