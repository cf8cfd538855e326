//! # Agent settings
//!
//! Settings are read from a single TOML file. Every field has a default, so
//! an empty file (or a missing one, see [`ConfigManager::load_or_create`])
//! yields a runnable, credential-less agent.
//!
//! ```toml
//! api_url = "https://jobs.example.com"
//! api_key = "key"
//! secret_key = "secret"
//! polling_interval_ms = 2000
//! default_printer = "counter"
//!
//! [printers.counter]
//! port = "/dev/ttyUSB0"
//! baud = 9600
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const MIN_POLLING_INTERVAL_MS: u64 = 1_000;
pub const MAX_POLLING_INTERVAL_MS: u64 = 60_000;
pub const MAX_COPIES: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serial device definition for a named printer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PrinterDevice {
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub default_printer: Option<String>,
    #[serde(default = "default_copies")]
    pub default_copies: u32,
    #[serde(default = "default_copy_delay_ms")]
    pub copy_delay_ms: u64,
    #[serde(default = "default_true")]
    pub auto_update: bool,
    /// Headless hosts have nobody to click "accept"; this answers for them.
    #[serde(default)]
    pub auto_accept_updates: bool,
    #[serde(default = "default_update_check_delay_secs")]
    pub update_check_delay_secs: u64,
    #[serde(default = "default_update_check_interval_secs")]
    pub update_check_interval_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default)]
    pub update_dir: Option<PathBuf>,
    #[serde(default = "default_telemetry_interval_secs")]
    pub telemetry_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Filled in from the server after a successful authentication.
    #[serde(default)]
    pub client_location: Option<String>,
    /// Bind address of the local status API; disabled when absent.
    #[serde(default)]
    pub status_api: Option<String>,
    #[serde(default)]
    pub printers: BTreeMap<String, PrinterDevice>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            secret_key: None,
            polling_interval_ms: default_polling_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            default_printer: None,
            default_copies: default_copies(),
            copy_delay_ms: default_copy_delay_ms(),
            auto_update: true,
            auto_accept_updates: false,
            update_check_delay_secs: default_update_check_delay_secs(),
            update_check_interval_secs: default_update_check_interval_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            update_dir: None,
            telemetry_interval_secs: default_telemetry_interval_secs(),
            log_level: default_log_level(),
            log_dir: None,
            client_location: None,
            status_api: None,
            printers: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(format!("api_url '{}' must start with http:// or https://", self.api_url));
        }
        if self.max_retries == 0 {
            return Err("max_retries must be >= 1".to_string());
        }
        if self.default_copies == 0 || self.default_copies > MAX_COPIES {
            return Err(format!("default_copies must be between 1 and {}", MAX_COPIES));
        }
        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be > 0".to_string());
        }
        if self.update_check_interval_secs == 0 || self.telemetry_interval_secs == 0 {
            return Err("update and telemetry intervals must be > 0".to_string());
        }
        if let Some(name) = &self.default_printer {
            if name.trim().is_empty() {
                return Err("default_printer must not be blank".to_string());
            }
        }
        for (name, device) in &self.printers {
            if device.port.trim().is_empty() {
                return Err(format!("printer '{}' has an empty port", name));
            }
        }
        Ok(())
    }

    /// Both halves of the credential pair are present and non-blank.
    pub fn has_credentials(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.api_key) && present(&self.secret_key)
    }

    /// Poll period with the operator value clamped into the supported range.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(
            self.polling_interval_ms
                .clamp(MIN_POLLING_INTERVAL_MS, MAX_POLLING_INTERVAL_MS),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn copy_delay(&self) -> Duration {
        Duration::from_millis(self.copy_delay_ms)
    }

    pub fn update_check_delay(&self) -> Duration {
        Duration::from_secs(self.update_check_delay_secs)
    }

    pub fn update_check_interval(&self) -> Duration {
        Duration::from_secs(self.update_check_interval_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs)
    }

    pub fn update_dir(&self) -> PathBuf {
        self.update_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("spool-update"))
    }
}

/// Owns the live settings together with the file they came from.
pub struct ConfigManager {
    config: AgentConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config: AgentConfig, config_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            config_path: config_path.into(),
        }
    }

    /// Loads settings, writing a default file first when none exists.
    pub fn load_or_create(config_path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = config_path.into();
        if !config_path.exists() {
            tracing::warn!("Config file '{}' not found, writing defaults", config_path.display());
            let manager = Self::new(AgentConfig::default(), config_path);
            manager.save()?;
            return Ok(manager);
        }
        let config = load_config(&config_path)?;
        Ok(Self::new(config, config_path))
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        save_config(&self.config_path, &self.config)
    }

    /// Re-reads the file; the in-memory copy is replaced only on success.
    pub fn reload(&mut self) -> Result<&AgentConfig, ConfigError> {
        self.config = load_config(&self.config_path)?;
        Ok(&self.config)
    }

    pub fn get_config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: AgentConfig) {
        self.config = config;
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

fn default_api_url() -> String { "https://delivery2.agenciaexpresso.com.br".to_string() }
fn default_polling_interval_ms() -> u64 { 2000 }
fn default_request_timeout_ms() -> u64 { 10_000 }
fn default_max_retries() -> u32 { 3 }
fn default_copies() -> u32 { 1 }
fn default_copy_delay_ms() -> u64 { 500 }
fn default_true() -> bool { true }
fn default_update_check_delay_secs() -> u64 { 120 }
fn default_update_check_interval_secs() -> u64 { 1800 }
fn default_download_timeout_secs() -> u64 { 600 }
fn default_telemetry_interval_secs() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }
fn default_baud() -> u32 { 9600 }

pub fn load_config(path: impl AsRef<Path>) -> Result<AgentConfig, ConfigError> {
    let path = path.as_ref();
    let config: AgentConfig = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
}

pub fn save_config(path: impl AsRef<Path>, config: &AgentConfig) -> Result<(), ConfigError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(path, toml_string)?;
    Ok(())
}
