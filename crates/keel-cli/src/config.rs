//! CLI configuration: the updater settings plus logging.
//!
//! The file is the updater's TOML file (`updater.toml` in the platform
//! config directory) with an optional `[logging]` table. Command-line flags
//! take precedence over file values.

use std::path::Path;

use serde::{Deserialize, Serialize};

use keel_updater::UpdateConfig;

/// Resolved CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Updater settings (top-level keys of the file)
    #[serde(flatten)]
    pub updater: UpdateConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when neither a flag nor `RUST_LOG` is given
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load from a custom path, or from the default location if present.
    pub fn load_from(custom_path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match custom_path {
            Some(path) => path.to_path_buf(),
            None => match UpdateConfig::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
        config.updater.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to configuration
    ///
    /// CLI arguments take precedence over config file values.
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(ref channel) = overrides.channel {
            self.updater.channel = channel.clone();
        }
        if let Some(ref base_url) = overrides.base_url {
            self.updater.base_url = Some(base_url.clone());
        }
        if overrides.debug == Some(true) {
            self.logging.level = "debug".to_string();
        } else if overrides.verbose == Some(true) {
            self.logging.level = "info".to_string();
        }
        self
    }
}

/// Values given on the command line that override the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Major-version channel override
    pub channel: Option<String>,
    /// Release base URL override
    pub base_url: Option<String>,
    /// Verbose flag override
    pub verbose: Option<bool>,
    /// Debug flag override
    pub debug: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flattened_file_layout() {
        let config: Config = toml::from_str(
            r#"
channel = "v2"
base_url = "https://mirror.example.com/keel"

[network]
timeout_seconds = 5

[logging]
level = "keel_updater=debug"
"#,
        )
        .unwrap();

        assert_eq!(config.updater.channel, "v2");
        assert_eq!(config.updater.base_url.as_deref(), Some("https://mirror.example.com/keel"));
        assert_eq!(config.updater.network.timeout_seconds, 5);
        assert_eq!(config.logging.level, "keel_updater=debug");
    }

    #[test]
    fn test_defaults_without_logging_table() {
        let config: Config = toml::from_str("tool_name = \"keel\"\n").unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.updater.channel, "v1");
    }

    #[test]
    fn test_cli_overrides() {
        let overrides = CliOverrides {
            channel: Some("v3".to_string()),
            base_url: Some("http://127.0.0.1:9000".to_string()),
            verbose: Some(true),
            debug: None,
        };

        let config = Config::default().with_overrides(&overrides);

        assert_eq!(config.updater.channel, "v3");
        assert_eq!(config.updater.base_url.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_debug_wins_over_verbose() {
        let overrides = CliOverrides {
            verbose: Some(true),
            debug: Some(true),
            ..CliOverrides::default()
        };
        assert_eq!(Config::default().with_overrides(&overrides).logging.level, "debug");
    }

    #[test]
    fn test_empty_overrides_keep_file_values() {
        let config = Config::default().with_overrides(&CliOverrides::default());
        assert_eq!(config.updater.channel, "v1");
        assert!(config.updater.base_url.is_none());
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_load_from_custom_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("keel.toml");
        std::fs::write(&path, "channel = \"v9\"\n").unwrap();

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(config.updater.channel, "v9");

        std::fs::write(&path, "channel = \"\"\n").unwrap();
        assert!(Config::load_from(Some(&path)).is_err());
        assert!(Config::load_from(Some(&temp_dir.path().join("absent.toml"))).is_err());
    }
}
