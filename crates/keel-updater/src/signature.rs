//! Detached manifest signature verification.
//!
//! # Security
//!
//! The bundled public key is the only trust anchor. Any failure (unreadable
//! or malformed key, malformed signature, signature not matching the
//! manifest bytes) is a verification failure; there is no partial trust.
//! On failure the manifest and signature files are deleted so the next
//! invocation cannot pick up an unverified artifact.

use std::path::{Path, PathBuf};

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use tracing::{debug, error};

use crate::error::UpdateError;

/// Verifies a manifest against its detached signature.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    public_key_path: PathBuf,
}

impl SignatureVerifier {
    pub fn new(public_key_path: impl Into<PathBuf>) -> Self {
        Self {
            public_key_path: public_key_path.into(),
        }
    }

    pub fn public_key_path(&self) -> &Path {
        &self.public_key_path
    }

    /// Verify `manifest_path` against `signature_path`.
    ///
    /// Deletes both files when verification fails.
    pub fn verify(&self, manifest_path: &Path, signature_path: &Path) -> Result<(), UpdateError> {
        match self.check(manifest_path, signature_path) {
            Ok(()) => {
                debug!(manifest = %manifest_path.display(), "Manifest signature verified");
                Ok(())
            }
            Err(e) => {
                error!(manifest = %manifest_path.display(), error = %e, "Manifest signature rejected");
                discard(manifest_path);
                discard(signature_path);
                Err(match e {
                    UpdateError::SignatureVerificationFailed(_) => e,
                    other => UpdateError::SignatureVerificationFailed(other.to_string()),
                })
            }
        }
    }

    fn check(&self, manifest_path: &Path, signature_path: &Path) -> Result<(), UpdateError> {
        let key = load_public_key(&self.public_key_path)?;
        let signature = parse_signature(&std::fs::read(signature_path)?)?;
        let manifest = std::fs::read(manifest_path)?;
        key.verify(&manifest, &signature)?;
        Ok(())
    }
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            error!(path = %path.display(), error = %e, "Failed to remove unverified file");
        }
    }
}

/// Load an Ed25519 public key file.
///
/// Accepts `ed25519:<hex|base64>` text or the 32 raw key bytes.
pub fn load_public_key(path: &Path) -> Result<VerifyingKey, UpdateError> {
    let data = std::fs::read(path).map_err(|e| {
        UpdateError::SignatureVerificationFailed(format!(
            "cannot read public key {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_public_key(&data)
}

/// Parse public key bytes in any accepted form.
pub fn parse_public_key(data: &[u8]) -> Result<VerifyingKey, UpdateError> {
    let bytes = if data.len() == PUBLIC_KEY_LENGTH {
        data.to_vec()
    } else {
        let text = std::str::from_utf8(data)
            .map_err(|_| invalid("public key is neither raw bytes nor text"))?
            .trim();
        let encoded = text
            .strip_prefix("ed25519:")
            .ok_or_else(|| invalid("public key must start with 'ed25519:'"))?;
        decode_text(encoded).ok_or_else(|| invalid("public key is not valid hex or base64"))?
    };

    let key_bytes: [u8; PUBLIC_KEY_LENGTH] = bytes
        .try_into()
        .map_err(|_| invalid("Ed25519 public key must be 32 bytes"))?;
    Ok(VerifyingKey::from_bytes(&key_bytes)?)
}

/// Parse a detached signature: hex text, base64 text, or 64 raw bytes.
pub fn parse_signature(data: &[u8]) -> Result<Signature, UpdateError> {
    let bytes = if data.len() == SIGNATURE_LENGTH {
        data.to_vec()
    } else {
        std::str::from_utf8(data)
            .ok()
            .and_then(|text| decode_text(text.trim()))
            .ok_or_else(|| invalid("signature is not valid hex or base64"))?
    };

    let sig_bytes: [u8; SIGNATURE_LENGTH] = bytes
        .try_into()
        .map_err(|_| invalid("Ed25519 signature must be 64 bytes"))?;
    Ok(Signature::from_bytes(&sig_bytes))
}

fn decode_text(text: &str) -> Option<Vec<u8>> {
    hex::decode(text)
        .ok()
        .or_else(|| base64::engine::general_purpose::STANDARD.decode(text).ok())
}

fn invalid(msg: &str) -> UpdateError {
    UpdateError::SignatureVerificationFailed(msg.to_string())
}
