//! Update orchestration.
//!
//! [`Updater::ensure_up_to_date`] is the one call the host tool makes before
//! shelling out to the helper. It probes the installed helper, takes the
//! cache fast path when it can, and otherwise fetches, verifies and
//! installs. Failures are swallowed when a usable helper is already
//! installed and propagated when none is.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cache::{CacheState, CacheStore};
use crate::config::{LockConfig, UpdateConfig};
use crate::error::UpdateError;
use crate::fetch::{FetchOutcome, ManifestFetcher};
use crate::install::{remove_if_exists, BinaryInstaller};
use crate::lock::UpdateLock;
use crate::manifest::Manifest;
use crate::platform::PlatformDescriptor;
use crate::probe::{normalize_version, probe_version};
use crate::signature::SignatureVerifier;
use crate::transport::{ReqwestTransport, Transport};

/// How an `ensure_up_to_date` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Cache record unexpired; no network access
    CacheFresh,
    /// Server answered 304; cache record refreshed
    NotModified,
    /// Manifest version equals the installed one; cache record refreshed
    UpToDate { version: String },
    /// A new helper was installed
    Installed { from: Option<String>, to: String },
    /// The update failed but the installed helper remains usable
    KeptExisting { version: String, reason: String },
}

/// Keeps the local helper binary present and current.
pub struct Updater {
    descriptor: PlatformDescriptor,
    lock: LockConfig,
    cache: CacheStore,
    fetcher: ManifestFetcher,
    verifier: SignatureVerifier,
    installer: BinaryInstaller,
}

impl Updater {
    pub fn new(descriptor: PlatformDescriptor, lock: LockConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            cache: CacheStore::new(&descriptor),
            fetcher: ManifestFetcher::new(transport.clone()),
            verifier: SignatureVerifier::new(descriptor.public_key_path()),
            installer: BinaryInstaller::new(transport, &descriptor),
            descriptor,
            lock,
        }
    }

    /// Build an updater talking to the network through `reqwest`.
    pub fn from_config(config: &UpdateConfig) -> Result<Self, UpdateError> {
        let descriptor = PlatformDescriptor::from_config(config)?;
        let transport = ReqwestTransport::from_network_config(&config.network)?;
        Ok(Self::new(descriptor, config.lock.clone(), Arc::new(transport)))
    }

    pub fn descriptor(&self) -> &PlatformDescriptor {
        &self.descriptor
    }

    /// Version reported by the installed helper.
    pub async fn local_version(&self) -> Result<String, UpdateError> {
        probe_version(&self.descriptor.binary_path(), self.descriptor.version_flag()).await
    }

    /// Forget the cache record and the cached manifest and signature.
    pub fn clear_cache(&self) -> Result<(), UpdateError> {
        self.cache.clear()?;
        remove_if_exists(&self.descriptor.manifest_path())?;
        remove_if_exists(&self.descriptor.signature_path())?;
        debug!(cache_dir = %self.descriptor.cache_dir().display(), "Cache cleared");
        Ok(())
    }

    /// Make sure the helper is installed and current.
    ///
    /// Returns an error only when no usable helper is installed afterwards.
    pub async fn ensure_up_to_date(&self) -> Result<UpdateOutcome, UpdateError> {
        let local = match self.local_version().await {
            Ok(version) => Some(version),
            Err(e) => {
                debug!(error = %e, "No usable helper installed, treating as first run");
                if let Err(e) = self.cache.clear() {
                    warn!(error = %e, "Failed to clear cache record");
                }
                None
            }
        };

        if let Some(version) = &local {
            if self.cache.load().is_valid() {
                debug!(version = %version, "Cache record fresh, skipping update check");
                return Ok(UpdateOutcome::CacheFresh);
            }
        }

        match self.update(local.as_deref()).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => match local {
                Some(version) => {
                    warn!(
                        error = %e,
                        category = %e.category(),
                        version = %version,
                        "Helper update failed, keeping installed binary"
                    );
                    Ok(UpdateOutcome::KeptExisting {
                        version,
                        reason: e.to_string(),
                    })
                }
                None => {
                    error!(error = %e, category = %e.category(), "Helper update failed and none is installed");
                    if let Err(e) = self.cache.clear() {
                        warn!(error = %e, "Failed to clear cache record");
                    }
                    Err(e)
                }
            },
        }
    }

    async fn update(&self, local: Option<&str>) -> Result<UpdateOutcome, UpdateError> {
        let _lock = if self.lock.enabled {
            Some(UpdateLock::acquire(&self.descriptor.lock_path(), &self.lock).await?)
        } else {
            None
        };

        // Another invocation may have finished an update while we waited.
        let previous = self.cache.load();
        if previous.is_valid() {
            if let Ok(version) = self.local_version().await {
                debug!(version = %version, "Helper refreshed by another invocation");
                return Ok(UpdateOutcome::CacheFresh);
            }
        }

        let manifest_path = self.descriptor.manifest_path();
        let fetched = self
            .fetcher
            .fetch_manifest(&self.descriptor.manifest_url(), &manifest_path, &previous)
            .await?;
        let state = match fetched {
            FetchOutcome::NotModified(state) if local.is_some() => {
                self.refresh_cache(&state);
                return Ok(UpdateOutcome::NotModified);
            }
            // Without a helper the cached manifest still has to be verified and used.
            other => other.cache_state().clone(),
        };

        self.verify_manifest(&manifest_path).await?;
        let manifest = Manifest::load(&manifest_path)?;
        let entry = manifest.entry(self.descriptor.channel(), self.descriptor.os())?;

        let wanted = normalize_version(&entry.version);
        if local == Some(wanted) {
            debug!(version = %wanted, "Helper is up to date");
            self.refresh_cache(&state);
            return Ok(UpdateOutcome::UpToDate {
                version: wanted.to_string(),
            });
        }

        info!(
            from = local.unwrap_or("none"),
            to = %wanted,
            "Updating helper binary"
        );
        self.installer.download(&entry.url).await?;
        self.installer.verify_checksum(&entry.checksum).await?;
        let installed = self.installer.install(wanted).await?;
        self.refresh_cache(&state);

        Ok(UpdateOutcome::Installed {
            from: local.map(str::to_string),
            to: installed,
        })
    }

    async fn verify_manifest(&self, manifest_path: &Path) -> Result<(), UpdateError> {
        let signature_path = self.descriptor.signature_path();
        if let Err(e) = self
            .fetcher
            .fetch_file(&self.descriptor.signature_url(), &signature_path)
            .await
        {
            remove_if_exists(manifest_path)?;
            return Err(e);
        }
        self.verifier.verify(manifest_path, &signature_path)
    }

    fn refresh_cache(&self, state: &CacheState) {
        if let Err(e) = self.cache.save(state) {
            warn!(error = %e, "Failed to save cache record");
        }
    }
}
