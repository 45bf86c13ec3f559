//! Helper binary download, checksum verification and installation.
//!
//! The candidate binary is streamed into a scratch file next to the
//! installed one and only promoted after its SHA-256 matches the manifest.
//! Promotion parks the previous binary at `<binary>.old`, renames the
//! scratch file into place and probes it; the parked copy is removed only
//! once the new binary answers the version probe, and is restored otherwise.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use crate::error::UpdateError;
use crate::platform::PlatformDescriptor;
use crate::probe::probe_version;
use crate::transport::{get_following_redirect, Request, Transport, ACCEPT_BINARY};

/// Buffer size for reading files during hash computation.
const HASH_BUFFER_SIZE: usize = 8192;

/// Downloads, verifies and installs the helper binary.
pub struct BinaryInstaller {
    transport: Arc<dyn Transport>,
    binary_path: PathBuf,
    scratch_path: PathBuf,
    aside_path: PathBuf,
    version_flag: String,
}

impl BinaryInstaller {
    pub fn new(transport: Arc<dyn Transport>, descriptor: &PlatformDescriptor) -> Self {
        Self {
            transport,
            binary_path: descriptor.binary_path(),
            scratch_path: descriptor.scratch_path(),
            aside_path: descriptor.aside_path(),
            version_flag: descriptor.version_flag().to_string(),
        }
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn scratch_path(&self) -> &Path {
        &self.scratch_path
    }

    /// Stream `url` into the scratch file.
    ///
    /// Follows one redirect. Anything but a 200 is an error, and a failed
    /// download leaves no scratch file behind.
    pub async fn download(&self, url: &str) -> Result<u64, UpdateError> {
        let request = Request::get(url, ACCEPT_BINARY);
        let response = get_following_redirect(self.transport.as_ref(), &request).await?;
        if response.status != 200 {
            return Err(UpdateError::UnexpectedStatus {
                status: response.status,
                url: url.to_string(),
            });
        }

        match response.write_to(&self.scratch_path).await {
            Ok(size) => {
                debug!(url, size, scratch = %self.scratch_path.display(), "Downloaded helper binary");
                Ok(size)
            }
            Err(e) => {
                self.discard_scratch();
                Err(e)
            }
        }
    }

    /// Compare the scratch file's SHA-256 with `expected_hex`.
    ///
    /// The comparison is case-insensitive on the hex text and constant-time
    /// on the digest. On mismatch the scratch file is deleted; the installed
    /// binary is never touched here.
    pub async fn verify_checksum(&self, expected_hex: &str) -> Result<(), UpdateError> {
        let scratch = self.scratch_path.clone();
        let actual = tokio::task::spawn_blocking(move || compute_hash(&scratch))
            .await
            .map_err(|e| UpdateError::InstallationFailed(format!("checksum task failed: {}", e)))??;

        if !checksum_matches(&actual, expected_hex) {
            error!(
                expected = %expected_hex,
                actual = %hex::encode(actual),
                path = %self.scratch_path.display(),
                "Helper binary checksum mismatch"
            );
            self.discard_scratch();
            return Err(UpdateError::ChecksumMismatch {
                expected: expected_hex.to_string(),
                actual: hex::encode(actual),
            });
        }

        debug!(hash = %hex::encode(actual), "Helper binary checksum verified");
        Ok(())
    }

    /// Promote the verified scratch file to the binary path.
    ///
    /// Returns the version the new binary reports. Fails, restoring the
    /// previous binary if there was one, when the rename or permission
    /// change fails or when the new binary does not report
    /// `expected_version`.
    pub async fn install(&self, expected_version: &str) -> Result<String, UpdateError> {
        remove_if_exists(&self.aside_path)?;

        let had_previous = self.binary_path.exists();
        if had_previous {
            std::fs::rename(&self.binary_path, &self.aside_path).map_err(|e| {
                UpdateError::InstallationFailed(format!("failed to move current binary aside: {}", e))
            })?;
        }

        if let Err(e) = self.promote_scratch() {
            self.restore(had_previous);
            return Err(e);
        }

        match probe_version(&self.binary_path, &self.version_flag).await {
            Ok(version) if version == expected_version => {
                if let Err(e) = remove_if_exists(&self.aside_path) {
                    warn!(path = %self.aside_path.display(), error = %e, "Failed to remove previous binary");
                }
                info!(version = %version, path = %self.binary_path.display(), "Helper binary installed");
                Ok(version)
            }
            Ok(version) => {
                self.restore(had_previous);
                Err(UpdateError::InstallationFailed(format!(
                    "installed binary reports version {}, manifest declares {}",
                    version, expected_version
                )))
            }
            Err(e) => {
                self.restore(had_previous);
                Err(UpdateError::InstallationFailed(format!(
                    "installed binary failed to run: {}",
                    e
                )))
            }
        }
    }

    /// Remove the scratch file, ignoring a missing one.
    pub fn discard_scratch(&self) {
        if let Err(e) = remove_if_exists(&self.scratch_path) {
            warn!(path = %self.scratch_path.display(), error = %e, "Failed to remove scratch file");
        }
    }

    fn promote_scratch(&self) -> Result<(), UpdateError> {
        std::fs::rename(&self.scratch_path, &self.binary_path).map_err(|e| {
            UpdateError::InstallationFailed(format!("failed to move new binary into place: {}", e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o755);
            std::fs::set_permissions(&self.binary_path, permissions).map_err(|e| {
                UpdateError::InstallationFailed(format!("failed to set permissions: {}", e))
            })?;
        }

        Ok(())
    }

    /// Drop whatever is at the binary path and bring the parked copy back.
    fn restore(&self, had_previous: bool) {
        if let Err(e) = remove_if_exists(&self.binary_path) {
            error!(path = %self.binary_path.display(), error = %e, "Failed to remove rejected binary");
        }
        if had_previous {
            match std::fs::rename(&self.aside_path, &self.binary_path) {
                Ok(()) => warn!(path = %self.binary_path.display(), "Restored previous helper binary"),
                Err(e) => error!(
                    path = %self.binary_path.display(),
                    error = %e,
                    "Failed to restore previous helper binary"
                ),
            }
        }
        self.discard_scratch();
    }
}

/// SHA-256 of a file, read in chunks.
pub fn compute_hash(path: &Path) -> Result<[u8; 32], UpdateError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().into())
}

/// Whether `actual` equals the digest spelled by `expected_hex` (any case).
pub fn checksum_matches(actual: &[u8; 32], expected_hex: &str) -> bool {
    match hex::decode(expected_hex.trim()) {
        Ok(expected) if expected.len() == actual.len() => actual[..].ct_eq(&expected[..]).into(),
        _ => false,
    }
}

/// Delete `path`, treating an already missing file as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<(), UpdateError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
