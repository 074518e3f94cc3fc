//! Configuration loading and management
//!
//! The instrument itself is configured with an [`InstrumentConfig`] value
//! handed to it at construction. The CLI loads that value, together with
//! logging and delivery settings, from `~/.config/iris/config.toml`.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/iris/` (~/.config/iris/)
//! - Data: `$XDG_DATA_HOME/iris/` (~/.local/share/iris/)
//! - State/Logs: `$XDG_STATE_HOME/iris/` (~/.local/state/iris/)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Path of the single-event collection endpoint, relative to the host.
pub const EVENT_ENDPOINT: &str = "api/event";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct, as read from `config.toml`
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Instrument configuration (collection host, site, autocapture)
    #[serde(default)]
    pub instrument: InstrumentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Native delivery settings
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Configuration of one instrument instance
///
/// Immutable for the lifetime of the instrument that owns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Collection host, e.g. `https://collect.example`
    #[serde(default)]
    pub host: String,

    /// Identifier of the site being measured
    #[serde(default, alias = "siteId")]
    pub site_id: String,

    /// Which capture families `start()` activates
    #[serde(default)]
    pub autocapture: Autocapture,

    /// Log swallowed failures and every send
    #[serde(default)]
    pub debug: bool,
}

impl InstrumentConfig {
    /// Create a config with autocapture and debug disabled
    pub fn new(host: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            site_id: site_id.into(),
            autocapture: Autocapture::default(),
            debug: false,
        }
    }

    pub fn with_autocapture(mut self, autocapture: impl Into<Autocapture>) -> Self {
        self.autocapture = autocapture.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Full URL events are posted to
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.host.trim_end_matches('/'), EVENT_ENDPOINT)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("instrument.host is required".to_string()));
        }
        let url = url::Url::parse(&self.host)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::Config(format!(
                "instrument.host must use http or https, got {}",
                url.scheme()
            )));
        }
        if self.site_id.trim().is_empty() {
            return Err(Error::Config("instrument.site_id is required".to_string()));
        }
        Ok(())
    }
}

/// Autocapture setting: either a master switch or per-family toggles
///
/// In the per-family form an omitted family counts as enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Autocapture {
    Toggle(bool),
    Families(AutocaptureConfig),
}

impl Default for Autocapture {
    fn default() -> Self {
        Autocapture::Toggle(false)
    }
}

impl From<bool> for Autocapture {
    fn from(enabled: bool) -> Self {
        Autocapture::Toggle(enabled)
    }
}

impl From<AutocaptureConfig> for Autocapture {
    fn from(families: AutocaptureConfig) -> Self {
        Autocapture::Families(families)
    }
}

impl Autocapture {
    fn family(&self, pick: impl Fn(&AutocaptureConfig) -> Option<bool>) -> bool {
        match self {
            Autocapture::Toggle(enabled) => *enabled,
            Autocapture::Families(families) => pick(families) != Some(false),
        }
    }

    pub fn pageviews(&self) -> bool {
        self.family(|f| f.pageviews)
    }

    pub fn clicks(&self) -> bool {
        self.family(|f| f.clicks)
    }

    pub fn webvitals(&self) -> bool {
        self.family(|f| f.webvitals)
    }
}

/// Per-family autocapture toggles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutocaptureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pageviews: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webvitals: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clicks: Option<bool>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Settings for the native delivery primitives
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// HTTP request timeout in seconds
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,

    /// Use the beacon worker; when false every send takes the fetch path
    #[serde(default = "default_true")]
    pub beacon: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_delivery_timeout(),
            beacon: true,
        }
    }
}

fn default_delivery_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/iris/config.toml` (~/.config/iris/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("iris").join("config.toml")
    }

    /// `$XDG_DATA_HOME/iris/` (~/.local/share/iris/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("iris")
    }

    /// `$XDG_STATE_HOME/iris/` (~/.local/state/iris/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("iris")
    }

    /// Durable storage file backing the visitor id on native hosts
    ///
    /// `$XDG_DATA_HOME/iris/storage.json`
    pub fn storage_path() -> PathBuf {
        Self::data_dir().join("storage.json")
    }

    /// `$XDG_STATE_HOME/iris/iris.log` (~/.local/state/iris/iris.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("iris.log")
    }
}
