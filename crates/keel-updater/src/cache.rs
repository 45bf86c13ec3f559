//! Cache record persistence.
//!
//! The record is two flat files in the cache directory: the validator token
//! (an ETag) and the expiry instant in Unix milliseconds. Loading fails open:
//! a missing, unreadable or non-numeric file yields an already-expired record.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::error::UpdateError;
use crate::platform::PlatformDescriptor;

/// Validator token and expiry of the last successful manifest check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheState {
    /// Opaque token echoed back in `If-None-Match`; empty when unknown
    pub validator: String,
    /// Instant after which the manifest must be revalidated
    pub expire_at: DateTime<Utc>,
}

impl CacheState {
    /// A record that is already expired and carries no validator.
    pub fn expired() -> Self {
        Self {
            validator: String::new(),
            expire_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn new(validator: impl Into<String>, expire_at: DateTime<Utc>) -> Self {
        Self {
            validator: validator.into(),
            expire_at,
        }
    }

    /// Whether the record is still fresh at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at > now
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

impl Default for CacheState {
    fn default() -> Self {
        Self::expired()
    }
}

/// Sole owner of the on-disk cache record.
#[derive(Debug, Clone)]
pub struct CacheStore {
    etag_path: PathBuf,
    expires_path: PathBuf,
}

impl CacheStore {
    pub fn new(descriptor: &PlatformDescriptor) -> Self {
        Self {
            etag_path: descriptor.etag_path(),
            expires_path: descriptor.expires_path(),
        }
    }

    /// Load the record, treating any defect as "expired".
    pub fn load(&self) -> CacheState {
        let validator = match fs::read_to_string(&self.etag_path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                debug!(path = %self.etag_path.display(), error = %e, "No cached validator");
                return CacheState::expired();
            }
        };

        let expire_at = match fs::read_to_string(&self.expires_path) {
            Ok(content) => match parse_expiry(&content) {
                Some(at) => at,
                None => {
                    warn!(path = %self.expires_path.display(), "Corrupt cache expiry, ignoring");
                    return CacheState::expired();
                }
            },
            Err(e) => {
                debug!(path = %self.expires_path.display(), error = %e, "No cached expiry");
                return CacheState::expired();
            }
        };

        CacheState { validator, expire_at }
    }

    /// Persist the record, creating the cache directory if needed.
    pub fn save(&self, state: &CacheState) -> Result<(), UpdateError> {
        if let Some(parent) = self.etag_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.etag_path, &state.validator)?;
        fs::write(&self.expires_path, state.expire_at.timestamp_millis().to_string())?;
        debug!(validator = %state.validator, expire_at = %state.expire_at, "Cache record saved");
        Ok(())
    }

    /// Forget the record. Missing files are not an error.
    pub fn clear(&self) -> Result<(), UpdateError> {
        for path in [&self.etag_path, &self.expires_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Parse an expiry file body (Unix milliseconds).
pub(crate) fn parse_expiry(content: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = content.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}
