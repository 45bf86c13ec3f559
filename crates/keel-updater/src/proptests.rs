//! Property-based tests for keel-updater.
//!
//! # Properties Tested
//!
//! - Checksum verification accepts exactly the matching digest, in any case
//! - Manifest signatures verify only over the exact signed bytes
//! - Cache expiry records survive a write/read cycle and garbage fails open
//! - `max-age` is found wherever it sits in a `Cache-Control` value

#![cfg(test)]

use chrono::{TimeZone, Utc};
use ed25519_dalek::{Signer, SigningKey};
use proptest::prelude::*;
use sha2::{Digest, Sha256};

use crate::cache::parse_expiry;
use crate::fetch::parse_max_age;
use crate::install::checksum_matches;
use crate::signature::{parse_public_key, parse_signature};

// =============================================================================
// Generators
// =============================================================================

fn arb_signing_key() -> impl Strategy<Value = SigningKey> {
    prop::array::uniform32(any::<u8>()).prop_map(|bytes| SigningKey::from_bytes(&bytes))
}

fn arb_content() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..4096)
}

fn arb_directive() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("public".to_string()),
        Just("no-transform".to_string()),
        Just("must-revalidate".to_string()),
        (0u32..1000).prop_map(|n| format!("s-maxage={}", n)),
    ]
}

// =============================================================================
// Checksum verification
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_checksum_accepts_matching_digest(content in arb_content(), upper in any::<bool>()) {
        let digest: [u8; 32] = Sha256::digest(&content).into();
        let mut declared = hex::encode(digest);
        if upper {
            declared = declared.to_uppercase();
        }
        prop_assert!(checksum_matches(&digest, &declared));
    }

    #[test]
    fn prop_checksum_rejects_modified_content(
        content in arb_content(),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let declared = hex::encode(Sha256::digest(&content));
        let mut tampered = content.clone();
        let i = index.index(tampered.len());
        tampered[i] ^= flip;
        let actual: [u8; 32] = Sha256::digest(&tampered).into();
        prop_assert!(!checksum_matches(&actual, &declared));
    }
}

// =============================================================================
// Manifest signatures
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_signature_binds_exact_bytes(
        key in arb_signing_key(),
        manifest in arb_content(),
        extra in any::<u8>(),
    ) {
        let signature = key.sign(&manifest);
        let encoded = format!("ed25519:{}", hex::encode(key.verifying_key().to_bytes()));
        let public = parse_public_key(encoded.as_bytes()).unwrap();
        let parsed = parse_signature(hex::encode(signature.to_bytes()).as_bytes()).unwrap();

        prop_assert!(public.verify_strict(&manifest, &parsed).is_ok());

        let mut altered = manifest.clone();
        altered.push(extra);
        prop_assert!(public.verify_strict(&altered, &parsed).is_err());
    }
}

// =============================================================================
// Cache record and Cache-Control parsing
// =============================================================================

proptest! {
    #[test]
    fn prop_expiry_record_roundtrips(millis in 0i64..4_102_444_800_000) {
        let at = Utc.timestamp_millis_opt(millis).unwrap();
        prop_assert_eq!(parse_expiry(&at.timestamp_millis().to_string()), Some(at));
    }

    #[test]
    fn prop_non_numeric_expiry_is_rejected(text in "[a-zA-Z:. -]{1,24}") {
        prop_assert!(parse_expiry(&text).is_none());
    }

    #[test]
    fn prop_max_age_found_among_directives(
        before in prop::collection::vec(arb_directive(), 0..3),
        after in prop::collection::vec(arb_directive(), 0..3),
        max_age in any::<u32>(),
    ) {
        let mut directives = before;
        directives.push(format!("max-age={}", max_age));
        directives.extend(after);
        let header = directives.join(", ");

        prop_assert_eq!(parse_max_age(&header), Some(u64::from(max_age)));
    }

    #[test]
    fn prop_no_max_age_without_directive(directives in prop::collection::vec(arb_directive(), 0..5)) {
        prop_assert_eq!(parse_max_age(&directives.join(", ")), None);
    }
}
