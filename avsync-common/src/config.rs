//! Configuration loading and config file resolution
//!
//! Config file resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. `AVSYNC_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/avsync/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing file is never fatal: a warning is logged and defaults are used.
//! A file that exists but does not parse or validate is an error.

use crate::params::PlaybackParams;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "AVSYNC_CONFIG";

/// Logging section of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level TOML document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub playback: PlaybackParams,
    pub logging: LoggingConfig,
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine(PathBuf),
    Environment(PathBuf),
    PlatformDefault(PathBuf),
    CompiledDefaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::PlatformDefault(p) => Some(p),
            ConfigSource::CompiledDefaults => None,
        }
    }
}

/// Pick the config file to load, following the priority order above
pub fn resolve_config_source(cli_arg: Option<&Path>) -> ConfigSource {
    if let Some(path) = cli_arg {
        return ConfigSource::CommandLine(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return ConfigSource::Environment(PathBuf::from(path));
        }
    }

    if let Some(path) = platform_config_path() {
        if path.exists() {
            return ConfigSource::PlatformDefault(path);
        }
    }

    ConfigSource::CompiledDefaults
}

/// Resolve and load the configuration
pub fn load_config(cli_arg: Option<&Path>) -> Result<(TomlConfig, ConfigSource)> {
    let source = resolve_config_source(cli_arg);
    let config = match source.path() {
        Some(path) if path.exists() => load_config_file(path)?,
        Some(path) => {
            warn!("Config file {} not found, using defaults", path.display());
            TomlConfig::default()
        }
        None => {
            debug!("No config file found, using compiled defaults");
            TomlConfig::default()
        }
    };
    Ok((config, source))
}

/// Parse and validate one config file
pub fn load_config_file(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    config.playback.validate().map_err(|e| match e {
        Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
        other => other,
    })?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

fn platform_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("avsync").join("config.toml"))
}
