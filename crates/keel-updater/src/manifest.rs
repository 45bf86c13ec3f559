//! Release manifest model.
//!
//! The manifest is a JSON object keyed by major-version channel, then by OS
//! identifier:
//!
//! ```json
//! { "v1": { "linux": { "version": "2.0.0", "url": "https://...", "checksum": "<sha256 hex>" } } }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Latest release of the helper for one channel and OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Version string, compared verbatim with the installed helper
    pub version: String,
    /// Download URL of the binary
    pub url: String,
    /// SHA-256 of the binary (hex encoded, any case)
    pub checksum: String,
}

/// Parsed manifest: channel -> OS -> entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    channels: BTreeMap<String, BTreeMap<String, ManifestEntry>>,
}

impl Manifest {
    pub fn from_slice(data: &[u8]) -> Result<Self, UpdateError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self, UpdateError> {
        let data = std::fs::read(path)?;
        Self::from_slice(&data)
    }

    /// Entry for a channel/OS pair.
    pub fn entry(&self, channel: &str, os: &str) -> Result<&ManifestEntry, UpdateError> {
        self.channels
            .get(channel)
            .and_then(|by_os| by_os.get(os))
            .ok_or_else(|| UpdateError::ManifestEntryMissing {
                channel: channel.to_string(),
                os: os.to_string(),
            })
    }

    /// Add or replace an entry. Used when building manifests.
    pub fn insert(&mut self, channel: impl Into<String>, os: impl Into<String>, entry: ManifestEntry) {
        self.channels
            .entry(channel.into())
            .or_default()
            .insert(os.into(), entry);
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }
}
