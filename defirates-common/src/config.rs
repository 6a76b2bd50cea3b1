//! Configuration loading and resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Tiers 1 and 2 arrive together as [`ConfigOverrides`] (the binary's argument
//! parser reads both); this module merges them with the TOML file.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DB_PATH: &str = "defirates.db";
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Upper bound on the refresh interval (one week)
pub const MAX_FETCH_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_SOURCES: &[&str] = &["pendle", "beefy"];

/// Contents of the optional `config.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_path: Option<PathBuf>,
    pub fetch_interval: Option<String>,
    pub load_sample: Option<bool>,
    pub sources: Option<Vec<String>>,
    pub log_level: Option<String>,
    pub http: TomlHttpConfig,
}

/// `[http]` table of `config.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlHttpConfig {
    pub max_retries: Option<u32>,
    pub initial_delay: Option<String>,
    pub max_delay: Option<String>,
    pub request_delay: Option<String>,
    pub timeout: Option<String>,
    pub proxy_url: Option<String>,
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_path: Option<PathBuf>,
    pub fetch_interval: Option<String>,
    pub load_sample: Option<bool>,
    pub sources: Option<Vec<String>>,
    pub log_level: Option<String>,
}

/// Retry and pacing behaviour of the outbound HTTP client
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Minimum spacing between consecutive requests
    pub request_delay: Duration,
    pub timeout: Duration,
    pub proxy_url: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            request_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            proxy_url: None,
        }
    }
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub fetch_interval: Duration,
    pub load_sample: bool,
    pub sources: Vec<String>,
    pub log_level: String,
    pub http: HttpSettings,
}

impl ServiceConfig {
    /// Merge overrides, TOML values and defaults
    pub fn resolve(overrides: ConfigOverrides, toml: TomlConfig) -> Result<Self> {
        let fetch_interval = match overrides.fetch_interval.or(toml.fetch_interval) {
            Some(raw) => parse_duration(&raw)?,
            None => DEFAULT_FETCH_INTERVAL,
        };
        if fetch_interval.is_zero() {
            return Err(Error::Config("fetch interval must be greater than zero".to_string()));
        }
        if fetch_interval > MAX_FETCH_INTERVAL {
            return Err(Error::Config(format!(
                "fetch interval {:?} exceeds the maximum of {:?}",
                fetch_interval, MAX_FETCH_INTERVAL
            )));
        }

        let sources = overrides
            .sources
            .or(toml.sources)
            .unwrap_or_else(|| DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect())
            .into_iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host: overrides
                .host
                .or(toml.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: overrides.port.or(toml.port).unwrap_or(DEFAULT_PORT),
            database_path: overrides
                .database_path
                .or(toml.database_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            fetch_interval,
            load_sample: overrides.load_sample.or(toml.load_sample).unwrap_or(false),
            sources,
            log_level: overrides
                .log_level
                .or(toml.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            http: resolve_http(toml.http)?,
        })
    }
}

fn resolve_http(toml: TomlHttpConfig) -> Result<HttpSettings> {
    let defaults = HttpSettings::default();
    let parse_or = |raw: Option<String>, fallback: Duration| -> Result<Duration> {
        raw.map(|r| parse_duration(&r)).transpose().map(|d| d.unwrap_or(fallback))
    };

    Ok(HttpSettings {
        max_retries: toml.max_retries.unwrap_or(defaults.max_retries),
        initial_delay: parse_or(toml.initial_delay, defaults.initial_delay)?,
        max_delay: parse_or(toml.max_delay, defaults.max_delay)?,
        request_delay: parse_or(toml.request_delay, defaults.request_delay)?,
        timeout: parse_or(toml.timeout, defaults.timeout)?,
        proxy_url: toml.proxy_url.filter(|url| !url.trim().is_empty()),
    })
}

/// Parse a duration such as `300`, `250ms`, `30s`, `5m` or `1h`
///
/// A bare number is read as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let value = raw.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| Error::Config(format!("Invalid duration '{}'", raw)))?;

    let seconds = |per_unit: u64| {
        amount
            .checked_mul(per_unit)
            .map(Duration::from_secs)
            .ok_or_else(|| Error::Config(format!("Duration '{}' is out of range", raw)))
    };

    let duration = match unit.trim() {
        "" | "s" => Duration::from_secs(amount),
        "ms" => Duration::from_millis(amount),
        "m" => seconds(60)?,
        "h" => seconds(60 * 60)?,
        other => {
            return Err(Error::Config(format!(
                "Invalid duration unit '{}' in '{}' (expected ms, s, m or h)",
                other, raw
            )))
        }
    };

    Ok(duration)
}

/// Locate the default configuration file, if one exists
///
/// Linux checks `~/.config/defirates/config.toml` then `/etc/defirates/config.toml`;
/// other platforms check the user config directory only.
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("defirates").join("config.toml"));
    if let Some(path) = user_config.filter(|p| p.exists()) {
        return Some(path);
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/defirates/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load the TOML config
///
/// An explicitly requested file must exist. Without one, the default location
/// is tried and a missing file yields an empty config.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) => path,
            None => {
                debug!("No config file found, using defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded config file: {}", path.display());
    Ok(config)
}
