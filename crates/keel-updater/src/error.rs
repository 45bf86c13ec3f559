//! Error types for the update system.

use thiserror::Error;

/// Coarse classification of update failures.
///
/// The orchestrator treats every category the same way (swallow when a
/// usable binary exists, propagate otherwise); the category only drives
/// diagnostics and the CLI exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Local binary missing, not executable, or unparsable version output
    LocalBinary,
    /// Connection failure or unexpected HTTP status
    Network,
    /// Manifest signature did not verify
    Trust,
    /// Downloaded binary checksum mismatch
    Integrity,
    /// Permission, rename or other filesystem failure
    Filesystem,
    /// Invalid configuration or manifest contents
    Config,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::LocalBinary => "local-binary",
            Self::Network => "network",
            Self::Trust => "trust",
            Self::Integrity => "integrity",
            Self::Filesystem => "filesystem",
            Self::Config => "config",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during update operations.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// No usable helper binary is installed
    #[error("helper binary unavailable: {0}")]
    LocalBinaryUnavailable(String),

    /// Server answered with a status other than 200/304 (or a redirect without Location)
    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// Network error during a request or while streaming a body
    #[error("network error: {0}")]
    NetworkError(String),

    /// Manifest signature verification failed
    #[error("manifest signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    /// Downloaded binary hash does not match the manifest
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Manifest has no entry for this channel/OS pair
    #[error("manifest has no entry for channel {channel} and os {os}")]
    ManifestEntryMissing { channel: String, os: String },

    /// Installation failed
    #[error("installation failed: {0}")]
    InstallationFailed(String),

    /// Another invocation holds the update lock
    #[error("timed out waiting for update lock at {0}")]
    LockTimeout(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl UpdateError {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::LocalBinaryUnavailable(_) => ErrorCategory::LocalBinary,
            Self::UnexpectedStatus { .. } | Self::NetworkError(_) => ErrorCategory::Network,
            Self::SignatureVerificationFailed(_) => ErrorCategory::Trust,
            Self::ChecksumMismatch { .. } => ErrorCategory::Integrity,
            Self::InstallationFailed(_) | Self::LockTimeout(_) | Self::IoError(_) => {
                ErrorCategory::Filesystem
            }
            Self::ManifestEntryMissing { .. } | Self::ConfigError(_) | Self::JsonError(_) => {
                ErrorCategory::Config
            }
        }
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        UpdateError::NetworkError(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for UpdateError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        UpdateError::SignatureVerificationFailed(err.to_string())
    }
}
