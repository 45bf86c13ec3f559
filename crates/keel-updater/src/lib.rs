//! # keel-updater
//!
//! Keeps the helper executable that `keel` shells out to present, verified
//! and current.
//!
//! This crate handles:
//! - Conditional manifest fetches (ETag validator, `Cache-Control: max-age`)
//! - Detached Ed25519 manifest signature verification
//! - SHA-256 checksum verification of downloaded binaries
//! - Installation that keeps the previous binary until the new one runs
//! - A cooperative lock so concurrent invocations do not race
//!
//! ## Failure policy
//!
//! Availability over freshness: when a usable helper is installed, every
//! update failure is logged and swallowed. Only when no usable helper exists
//! does [`Updater::ensure_up_to_date`] return an error.
//!
//! ```ignore
//! use keel_updater::{UpdateConfig, Updater};
//!
//! let config = UpdateConfig::load_from(None)?;
//! let updater = Updater::from_config(&config)?;
//! updater.ensure_up_to_date().await?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod install;
pub mod lock;
pub mod manifest;
pub mod platform;
pub mod probe;
#[cfg(test)]
mod proptests;
pub mod signature;
pub mod transport;
pub mod updater;

// Re-export main types for convenience
pub use cache::{CacheState, CacheStore};
pub use config::{LockConfig, NetworkConfig, PathsConfig, UpdateConfig};
pub use error::{ErrorCategory, UpdateError};
pub use fetch::{FetchOutcome, ManifestFetcher};
pub use install::BinaryInstaller;
pub use lock::UpdateLock;
pub use manifest::{Manifest, ManifestEntry};
pub use platform::{current_os, env_override_var, PlatformDescriptor};
pub use probe::probe_version;
pub use signature::SignatureVerifier;
pub use transport::{ReqwestTransport, Request, Response, Transport};
pub use updater::{UpdateOutcome, Updater};
