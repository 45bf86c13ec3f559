//! Configuration structures for the update system.
//!
//! The configuration is loaded once at startup and handed to
//! [`PlatformDescriptor::from_config`](crate::platform::PlatformDescriptor::from_config);
//! nothing in this crate reads it from global state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Main update configuration.
///
/// # Example TOML
///
/// ```toml
/// tool_name = "keel"
/// bucket = "keel-releases"
/// channel = "v1"
///
/// [paths]
/// # bin_dir = "/opt/keel/bin"
///
/// [network]
/// timeout_seconds = 30
/// read_timeout_seconds = 60
/// # proxy = "http://proxy.internal:3128"
///
/// [lock]
/// enabled = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Name of the host tool; drives file names and the env override
    #[serde(default = "default_tool_name")]
    pub tool_name: String,

    /// Remote bucket holding the manifest, signature and binaries
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Explicit base URL, replacing the one derived from `bucket`
    #[serde(default)]
    pub base_url: Option<String>,

    /// Major-version channel to track
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Flag passed to the helper to make it print its version
    #[serde(default = "default_version_flag")]
    pub version_flag: String,

    /// Directory overrides
    #[serde(default)]
    pub paths: PathsConfig,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Inter-process update lock
    #[serde(default)]
    pub lock: LockConfig,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            tool_name: default_tool_name(),
            bucket: default_bucket(),
            base_url: None,
            channel: default_channel(),
            version_flag: default_version_flag(),
            paths: PathsConfig::default(),
            network: NetworkConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

impl UpdateConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| UpdateError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a custom path, or from the default location.
    ///
    /// A missing default file yields the built-in defaults; a missing
    /// custom file is an error.
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, UpdateError> {
        if let Some(path) = custom_path {
            return Self::load_from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UpdateError::ConfigError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default configuration file location, e.g. `~/.config/keel/updater.toml`.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs(&default_tool_name()).map(|dirs| dirs.config_dir().join("updater.toml"))
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.tool_name.trim().is_empty() {
            return Err(UpdateError::ConfigError("tool_name must not be empty".to_string()));
        }
        if self.channel.trim().is_empty() {
            return Err(UpdateError::ConfigError("channel must not be empty".to_string()));
        }
        if self.base_url.is_none() && self.bucket.trim().is_empty() {
            return Err(UpdateError::ConfigError(
                "either bucket or base_url must be set".to_string(),
            ));
        }
        if let Some(url) = &self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(UpdateError::ConfigError(format!(
                    "invalid base_url '{}': must start with http:// or https://",
                    url
                )));
            }
        }
        if self.network.timeout_seconds == 0 {
            return Err(UpdateError::ConfigError(
                "network.timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.network.read_timeout_seconds == 0 {
            return Err(UpdateError::ConfigError(
                "network.read_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.lock.enabled && self.lock.timeout_seconds == 0 {
            return Err(UpdateError::ConfigError(
                "lock.timeout_seconds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Directory overrides. Unset entries fall back to platform directories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where the helper binary is installed
    #[serde(default)]
    pub bin_dir: Option<PathBuf>,

    /// Where the manifest, signature and cache record live
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Where the bundled public key lives
    #[serde(default)]
    pub key_dir: Option<PathBuf>,
}

/// Network configuration for manifest and binary downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Longest silence tolerated while reading a response, in seconds.
    /// A body that keeps arriving is never cut off.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,

    /// Proxy URL (unset = none)
    #[serde(default)]
    pub proxy: Option<String>,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            read_timeout_seconds: default_read_timeout(),
            proxy: None,
            user_agent: default_user_agent(),
        }
    }
}

/// Cooperative lock around the network/install part of an update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Whether to take the lock at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long to wait for another invocation to finish
    #[serde(default = "default_lock_timeout")]
    pub timeout_seconds: u64,

    /// Age after which an abandoned lock file is reclaimed
    #[serde(default = "default_lock_stale")]
    pub stale_after_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: default_lock_timeout(),
            stale_after_seconds: default_lock_stale(),
        }
    }
}

pub(crate) fn project_dirs(tool_name: &str) -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "keel", tool_name)
}

// Default value functions for serde
fn default_tool_name() -> String {
    "keel".to_string()
}

fn default_bucket() -> String {
    "keel-releases".to_string()
}

fn default_channel() -> String {
    "v1".to_string()
}

fn default_version_flag() -> String {
    "--version".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("keel-updater/{}", env!("CARGO_PKG_VERSION"))
}

fn default_lock_timeout() -> u64 {
    60
}

fn default_lock_stale() -> u64 {
    600
}
