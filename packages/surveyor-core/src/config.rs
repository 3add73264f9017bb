//! Pipeline configuration.
//!
//! A single [`SurveyConfig`] value is threaded through every stage of a
//! discovery run. Values are resolved with priority:
//! 1. Command-line overrides (applied by the caller)
//! 2. Config file (`--config`, `$SURVEYOR_CONFIG`, or `~/.config/surveyor/config.toml`)
//! 3. Default values

use crate::error::{Result, SurveyError};
use crate::inventory::codec::Encoding;
use crate::scanner::DEFAULT_SERVICE_PORT;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const ENV_CONFIG_PATH: &str = "SURVEYOR_CONFIG";

/// Upper bound on the number of hosts a single range may expand to
pub const DEFAULT_MAX_HOSTS: usize = 65_536;

const DEFAULT_PING_WORKERS: usize = 50;
const DEFAULT_PING_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_OUTPUT_PATH: &str = "discovered_inventory.yml";

/// Where the configuration came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    #[default]
    Default,
    /// Loaded from the file named by `$SURVEYOR_CONFIG`
    Environment(PathBuf),
    /// Loaded from a config file
    ConfigFile(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "defaults"),
            ConfigSource::Environment(path) => {
                write!(f, "{} (from {})", path.display(), ENV_CONFIG_PATH)
            }
            ConfigSource::ConfigFile(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Liveness probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachabilityConfig {
    /// Maximum probes in flight
    pub workers: usize,
    /// Per-probe timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_PING_WORKERS,
            timeout_ms: DEFAULT_PING_TIMEOUT_MS,
        }
    }
}

impl ReachabilityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// TCP service probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Port that must accept a TCP connection
    pub port: u16,
    /// Maximum connects in flight; half the reachability bound when unset
    pub workers: Option<usize>,
    /// Per-connection timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVICE_PORT,
            workers: None,
            timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Worker bound, derived from the reachability bound when not set explicitly
    pub fn effective_workers(&self, reachability: &ReachabilityConfig) -> usize {
        self.workers
            .unwrap_or(reachability.workers / 2)
            .max(1)
    }
}

/// Settings that shape the generated inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventorySettings {
    /// Prefix of every canonical hostname (`device` gives `device-10-0-0-5`)
    pub hostname_prefix: String,
    /// `device_role` written on every discovered host
    pub device_role: String,
    /// `site` written on every discovered host
    pub site: String,
    /// Secret store tag used in credential placeholders (`${vault:...}`)
    pub secret_store: String,
    /// Variables attached to the root `all` group
    pub vars: IndexMap<String, serde_json::Value>,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            hostname_prefix: "device".to_string(),
            device_role: "auto_discovered".to_string(),
            site: "discovered".to_string(),
            secret_store: "vault".to_string(),
            vars: IndexMap::new(),
        }
    }
}

/// Where and how the inventory is written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
    /// Encoding; inferred from the file extension when unset
    pub encoding: Option<Encoding>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            encoding: None,
        }
    }
}

impl OutputConfig {
    /// Explicit encoding, else the one implied by the path, else YAML
    pub fn effective_encoding(&self) -> Encoding {
        self.encoding
            .or_else(|| Encoding::from_path(&self.path))
            .unwrap_or_default()
    }
}

/// Runtime configuration for a discovery run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    /// Ranges expanding to more hosts than this are rejected
    pub max_hosts: usize,
    pub reachability: ReachabilityConfig,
    pub service: ServiceConfig,
    pub inventory: InventorySettings,
    pub output: OutputConfig,
    /// Source of the configuration (for display)
    #[serde(skip)]
    pub source: ConfigSource,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            max_hosts: DEFAULT_MAX_HOSTS,
            reachability: ReachabilityConfig::default(),
            service: ServiceConfig::default(),
            inventory: InventorySettings::default(),
            output: OutputConfig::default(),
            source: ConfigSource::Default,
        }
    }
}

impl SurveyConfig {
    /// Load configuration.
    ///
    /// An explicit path (or `$SURVEYOR_CONFIG`) must exist and parse. The
    /// per-user default file is optional; when it is unreadable a warning is
    /// logged and defaults are used.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let mut config = Self::from_file(path)?;
            config.source = ConfigSource::ConfigFile(path.to_path_buf());
            return Ok(config);
        }

        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            let path = PathBuf::from(path.trim());
            if !path.as_os_str().is_empty() {
                let mut config = Self::from_file(&path)?;
                config.source = ConfigSource::Environment(path);
                return Ok(config);
            }
        }

        if let Some(path) = config_file_path() {
            if path.exists() {
                match Self::from_file(&path) {
                    Ok(mut config) => {
                        tracing::debug!("Loaded config from {:?}", path);
                        config.source = ConfigSource::ConfigFile(path);
                        return Ok(config);
                    }
                    Err(e) => tracing::warn!("Ignoring config file: {}", e),
                }
            }
        }

        tracing::debug!("Using default configuration");
        Ok(Self::default())
    }

    /// Read and parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| SurveyError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Parse TOML content; `origin` is only used in error messages
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| SurveyError::Config {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate(origin)?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self, origin: &Path) -> Result<()> {
        let fail = |message: &str| SurveyError::Config {
            path: origin.to_path_buf(),
            message: message.to_string(),
        };

        if self.reachability.workers == 0 {
            return Err(fail("reachability.workers must be at least 1"));
        }
        if self.service.workers == Some(0) {
            return Err(fail("service.workers must be at least 1"));
        }
        if self.reachability.timeout_ms == 0 || self.service.timeout_ms == 0 {
            return Err(fail("probe timeouts must be greater than zero"));
        }
        if self.service.port == 0 {
            return Err(fail("service.port must be between 1 and 65535"));
        }
        if self.max_hosts == 0 {
            return Err(fail("max_hosts must be at least 1"));
        }
        if self.inventory.hostname_prefix.trim().is_empty() {
            return Err(fail("inventory.hostname_prefix must not be empty"));
        }
        if self.inventory.secret_store.trim().is_empty() {
            return Err(fail("inventory.secret_store must not be empty"));
        }
        Ok(())
    }

    /// Service worker bound after applying the half-of-reachability default
    pub fn service_workers(&self) -> usize {
        self.service.effective_workers(&self.reachability)
    }
}

/// Get the path to the per-user configuration file
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("surveyor").join("config.toml"))
}

/// Get the path to the config file for documentation purposes
pub fn config_file_path_string() -> String {
    config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/surveyor/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# Surveyor Configuration
# Place this file at: ~/.config/surveyor/config.toml

# Ranges expanding to more hosts than this are rejected
# max_hosts = 65536

[reachability]
# workers = 50
# timeout_ms = 1000

[service]
# port = 22
# workers = 25        # defaults to half of reachability.workers
# timeout_ms = 3000

[inventory]
# hostname_prefix = "device"
# device_role = "auto_discovered"
# site = "discovered"
# secret_store = "vault"

# [inventory.vars]
# ansible_python_interpreter = "auto_silent"

[output]
# path = "discovered_inventory.yml"
# encoding = "yaml"   # yaml | json | ini
"#
    .to_string()
}
