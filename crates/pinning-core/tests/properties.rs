//! Property-Based Tests for Manifest and Signature Invariants
//!
//! These tests verify the signing contract for arbitrary inputs:
//! 1. Manifests list records in non-decreasing `expire` order
//! 2. Signing is deterministic: identical inputs produce identical bytes
//! 3. Signatures verify against the canonical form of `payload` alone
//! 4. Canonicalization makes signatures independent of JSON formatting
//!
//! Uses proptest for property-based testing with arbitrary inputs.

use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD, Engine};
use proptest::prelude::*;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha512};

use pinning_core::{signed_keys, FileStructure, PinRecord, Signer};

/// RSA key generation dominates test time, so every case shares one signer.
fn shared_signer() -> &'static Signer {
    static SIGNER: OnceLock<Signer> = OnceLock::new();
    SIGNER.get_or_init(|| {
        Signer::new(rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
    })
}

fn record(fqdn: &str, expire: i64) -> PinRecord {
    PinRecord {
        fqdn: fqdn.into(),
        key: format!("{fqdn}-pin="),
        expire,
        ..PinRecord::default()
    }
}

fn verify_payload(signer: &Signer, manifest: &FileStructure) -> bool {
    let payload_value = serde_json::to_value(&manifest.payload).unwrap();
    let canonical = serde_jcs::to_vec(&payload_value).unwrap();
    let hashed = Sha512::digest(&canonical);
    let signature = match STANDARD.decode(&manifest.signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    signer
        .public_key()
        .verify(Pkcs1v15Sign::new::<Sha512>(), &hashed, &signature)
        .is_ok()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Records in an emitted manifest are non-decreasing by expire,
    /// whatever order they were handed in.
    #[test]
    fn prop_manifest_sorted_by_expire(expires in prop::collection::vec(-10_000i64..10_000_000, 1..8)) {
        let signer = shared_signer();
        let keys: Vec<PinRecord> = expires
            .iter()
            .enumerate()
            .map(|(i, e)| record(&format!("host-{i}.test"), *e))
            .collect();

        let out = signed_keys("f.json", keys, signer).unwrap().unwrap();
        let parsed: FileStructure = serde_json::from_slice(&out).unwrap();

        let emitted: Vec<i64> = parsed.payload.keys.iter().map(|k| k.expire).collect();
        for pair in emitted.windows(2) {
            prop_assert!(pair[0] <= pair[1], "expire order violated: {:?}", emitted);
        }
    }

    /// Identical inputs produce identical manifest bytes (and signatures).
    #[test]
    fn prop_manifest_deterministic(expires in prop::collection::vec(0i64..1_000_000, 1..6)) {
        let signer = shared_signer();
        let keys: Vec<PinRecord> = expires
            .iter()
            .enumerate()
            .map(|(i, e)| record(&format!("host-{i}.test"), *e))
            .collect();

        let first = signed_keys("f.json", keys.clone(), signer).unwrap().unwrap();
        let second = signed_keys("f.json", keys, signer).unwrap().unwrap();

        prop_assert_eq!(first, second);
    }

    /// Every emitted manifest verifies against the canonical payload.
    #[test]
    fn prop_manifest_signature_verifies(expires in prop::collection::vec(0i64..1_000_000, 1..6)) {
        let signer = shared_signer();
        let keys: Vec<PinRecord> = expires
            .iter()
            .enumerate()
            .map(|(i, e)| record(&format!("host-{i}.test"), *e))
            .collect();

        let out = signed_keys("f.json", keys, signer).unwrap().unwrap();
        let parsed: FileStructure = serde_json::from_slice(&out).unwrap();

        prop_assert!(verify_payload(signer, &parsed));
    }

    /// Signatures are independent of JSON key order and whitespace.
    #[test]
    fn prop_sign_ignores_formatting(a in 0i64..1_000, b in 0i64..1_000) {
        let signer = shared_signer();

        let compact = format!(r#"{{"b":{b},"a":{a}}}"#);
        let spaced = format!(r#"{{ "a": {a},   "b": {b} }}"#);

        prop_assert_eq!(
            signer.sign(compact.as_bytes()).unwrap(),
            signer.sign(spaced.as_bytes()).unwrap()
        );
    }

    /// Tampering with the payload after signing breaks verification.
    #[test]
    fn prop_tampered_payload_fails(expire in 1i64..1_000_000) {
        let signer = shared_signer();

        let out = signed_keys("f.json", vec![record("a.test", expire)], signer)
            .unwrap()
            .unwrap();
        let mut parsed: FileStructure = serde_json::from_slice(&out).unwrap();

        parsed.payload.keys[0].expire += 1;

        prop_assert!(!verify_payload(signer, &parsed));
    }
}
