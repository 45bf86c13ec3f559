//! Platform descriptor: OS naming, remote URLs and local paths.
//!
//! Pure computation from an [`UpdateConfig`]. The only environment input is
//! the optional helper path override, read once in
//! [`PlatformDescriptor::from_config`].

use std::path::{Path, PathBuf};

use crate::config::{project_dirs, UpdateConfig};
use crate::error::UpdateError;

/// File name of the manifest, locally and remotely.
pub const MANIFEST_FILE: &str = "manifest.json";
/// File name of the detached manifest signature, locally and remotely.
pub const SIGNATURE_FILE: &str = "manifest.json.sig";
/// File name of the bundled public key inside the key directory.
pub const PUBLIC_KEY_FILE: &str = "manifest.pub";
/// Cache record file holding the validator token.
pub const ETAG_FILE: &str = "etag";
/// Cache record file holding the expiry instant.
pub const EXPIRES_FILE: &str = "expires";
/// Lock file serialising concurrent updates.
pub const LOCK_FILE: &str = "update.lock";

/// Get the current OS identifier as used by manifest entries.
pub fn current_os() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        "unknown"
    }
}

/// Resolved names, URLs and paths for one host tool on one OS.
#[derive(Debug, Clone)]
pub struct PlatformDescriptor {
    tool_name: String,
    channel: String,
    os: String,
    base_url: String,
    version_flag: String,
    bin_dir: PathBuf,
    cache_dir: PathBuf,
    key_dir: PathBuf,
    binary_override: Option<PathBuf>,
}

impl PlatformDescriptor {
    /// Resolve a descriptor from configuration and the environment override.
    pub fn from_config(config: &UpdateConfig) -> Result<Self, UpdateError> {
        config.validate()?;

        let dirs = project_dirs(&config.tool_name);
        let bin_dir = resolve_dir(
            &config.paths.bin_dir,
            dirs.as_ref().map(|d| d.data_dir().join("bin")),
        )?;
        let cache_dir = resolve_dir(
            &config.paths.cache_dir,
            dirs.as_ref().map(|d| d.cache_dir().to_path_buf()),
        )?;
        let key_dir = resolve_dir(
            &config.paths.key_dir,
            dirs.as_ref().map(|d| d.config_dir().join("keys")),
        )?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.s3.amazonaws.com/{}", config.bucket, config.tool_name));

        let binary_override = std::env::var_os(env_override_var(&config.tool_name))
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            tool_name: config.tool_name.clone(),
            channel: config.channel.clone(),
            os: current_os().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            version_flag: config.version_flag.clone(),
            bin_dir,
            cache_dir,
            key_dir,
            binary_override,
        })
    }

    /// Replace the OS identifier (for cross-platform manifests in tests).
    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = os.into();
        self
    }

    /// Point the helper binary at an explicit path.
    pub fn with_binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_override = Some(path.into());
        self
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Major-version channel used to select the manifest entry.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// OS identifier used to select the manifest entry.
    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn version_flag(&self) -> &str {
        &self.version_flag
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn manifest_url(&self) -> String {
        format!("{}/{}", self.base_url, MANIFEST_FILE)
    }

    pub fn signature_url(&self) -> String {
        format!("{}/{}", self.base_url, SIGNATURE_FILE)
    }

    /// File name of the helper binary for this OS.
    pub fn binary_name(&self) -> String {
        if self.os == "windows" {
            format!("{}-helper.exe", self.tool_name)
        } else {
            format!("{}-helper", self.tool_name)
        }
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    /// Path of the installed helper, honouring the env override.
    pub fn binary_path(&self) -> PathBuf {
        self.binary_override
            .clone()
            .unwrap_or_else(|| self.bin_dir.join(self.binary_name()))
    }

    /// Scratch file a candidate binary is streamed into.
    ///
    /// Lives next to the binary so the final rename never crosses filesystems.
    pub fn scratch_path(&self) -> PathBuf {
        sibling(&self.binary_path(), "download")
    }

    /// Where the previous binary is parked while the new one is installed.
    pub fn aside_path(&self) -> PathBuf {
        sibling(&self.binary_path(), "old")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.cache_dir.join(MANIFEST_FILE)
    }

    pub fn signature_path(&self) -> PathBuf {
        self.cache_dir.join(SIGNATURE_FILE)
    }

    pub fn etag_path(&self) -> PathBuf {
        self.cache_dir.join(ETAG_FILE)
    }

    pub fn expires_path(&self) -> PathBuf {
        self.cache_dir.join(EXPIRES_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.cache_dir.join(LOCK_FILE)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.key_dir.join(PUBLIC_KEY_FILE)
    }
}

/// Name of the env var overriding the helper path, e.g. `KEEL_HELPER_PATH`.
pub fn env_override_var(tool_name: &str) -> String {
    format!("{}_HELPER_PATH", tool_name.to_uppercase().replace('-', "_"))
}

fn resolve_dir(explicit: &Option<PathBuf>, fallback: Option<PathBuf>) -> Result<PathBuf, UpdateError> {
    explicit.clone().or(fallback).ok_or_else(|| {
        UpdateError::ConfigError("cannot determine home directory; set explicit paths".to_string())
    })
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;

    fn test_config() -> UpdateConfig {
        UpdateConfig {
            tool_name: "keel-platform-test".to_string(),
            paths: PathsConfig {
                bin_dir: Some(PathBuf::from("/tmp/kp/bin")),
                cache_dir: Some(PathBuf::from("/tmp/kp/cache")),
                key_dir: Some(PathBuf::from("/tmp/kp/keys")),
            },
            ..UpdateConfig::default()
        }
    }

    #[test]
    fn test_urls_from_bucket() {
        let mut config = test_config();
        config.bucket = "my-bucket".to_string();
        let desc = PlatformDescriptor::from_config(&config).unwrap();

        assert_eq!(
            desc.manifest_url(),
            "https://my-bucket.s3.amazonaws.com/keel-platform-test/manifest.json"
        );
        assert_eq!(
            desc.signature_url(),
            "https://my-bucket.s3.amazonaws.com/keel-platform-test/manifest.json.sig"
        );
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let mut config = test_config();
        config.base_url = Some("http://127.0.0.1:8080/dist/".to_string());
        let desc = PlatformDescriptor::from_config(&config).unwrap();
        assert_eq!(desc.manifest_url(), "http://127.0.0.1:8080/dist/manifest.json");
    }

    #[test]
    fn test_local_paths() {
        let desc = PlatformDescriptor::from_config(&test_config())
            .unwrap()
            .with_os("linux");

        assert_eq!(desc.binary_path(), PathBuf::from("/tmp/kp/bin/keel-platform-test-helper"));
        assert_eq!(
            desc.scratch_path(),
            PathBuf::from("/tmp/kp/bin/keel-platform-test-helper.download")
        );
        assert_eq!(desc.aside_path(), PathBuf::from("/tmp/kp/bin/keel-platform-test-helper.old"));
        assert_eq!(desc.manifest_path(), PathBuf::from("/tmp/kp/cache/manifest.json"));
        assert_eq!(desc.etag_path(), PathBuf::from("/tmp/kp/cache/etag"));
        assert_eq!(desc.expires_path(), PathBuf::from("/tmp/kp/cache/expires"));
        assert_eq!(desc.public_key_path(), PathBuf::from("/tmp/kp/keys/manifest.pub"));
    }

    #[test]
    fn test_windows_binary_name() {
        let desc = PlatformDescriptor::from_config(&test_config())
            .unwrap()
            .with_os("windows");
        assert_eq!(desc.binary_name(), "keel-platform-test-helper.exe");
    }

    #[test]
    fn test_binary_override() {
        let desc = PlatformDescriptor::from_config(&test_config())
            .unwrap()
            .with_binary_path("/usr/local/bin/helper");
        assert_eq!(desc.binary_path(), PathBuf::from("/usr/local/bin/helper"));
        assert_eq!(desc.scratch_path(), PathBuf::from("/usr/local/bin/helper.download"));
    }

    #[test]
    fn test_env_override_var_name() {
        assert_eq!(env_override_var("keel"), "KEEL_HELPER_PATH");
        assert_eq!(env_override_var("my-tool"), "MY_TOOL_HELPER_PATH");
    }

    #[test]
    fn test_current_os_is_known_on_ci_targets() {
        let os = current_os();
        assert!(["windows", "darwin", "linux", "unknown"].contains(&os));
    }
}
