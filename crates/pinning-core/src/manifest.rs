//! Signed manifest assembly

use tracing::{debug, warn};

use crate::error::Result;
use crate::record::{FileKeys, FileStructure, PinRecord};
use crate::signer::Signer;

/// Build the signed JSON manifest for one file.
///
/// Records are sorted ascending by `expire` before signing, so rotation
/// overlap always lists the pin closest to expiry first. The payload is
/// serialized indented only as a signing input; the signer re-canonicalizes
/// it, so any verifier can recover the signed bytes from `payload` alone.
///
/// Returns `None` when there are no records (the caller decides whether
/// that is a 404).
pub fn signed_keys(
    file: &str,
    mut keys: Vec<PinRecord>,
    signer: &Signer,
) -> Result<Option<Vec<u8>>> {
    if keys.is_empty() {
        warn!(file = %file, "no keys to sign");
        return Ok(None);
    }

    keys.sort_by_key(|k| k.expire);

    let payload = FileKeys { keys };
    let payload_bytes = serde_json::to_vec_pretty(&payload)?;

    let signature = signer.sign(&payload_bytes)?;

    debug!(file = %file, "signature created");

    let out = serde_json::to_vec_pretty(&FileStructure { payload, signature })?;

    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_signer() -> Signer {
        Signer::new(rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
    }

    fn record(fqdn: &str, expire: i64) -> PinRecord {
        PinRecord {
            fqdn: fqdn.into(),
            key: format!("{fqdn}-pin="),
            expire,
            ..PinRecord::default()
        }
    }

    #[test]
    fn test_empty_records_yield_none() {
        let signer = test_signer();

        assert!(signed_keys("f.json", vec![], &signer).unwrap().is_none());
    }

    #[test]
    fn test_records_sorted_by_expire() {
        let signer = test_signer();
        let keys = vec![record("b.test", 2000), record("a.test", 1000), record("c.test", 1500)];

        let out = signed_keys("f.json", keys, &signer).unwrap().unwrap();
        let parsed: FileStructure = serde_json::from_slice(&out).unwrap();

        let expires: Vec<i64> = parsed.payload.keys.iter().map(|k| k.expire).collect();
        assert_eq!(expires, vec![1000, 1500, 2000]);
    }

    #[test]
    fn test_output_is_deterministic() {
        let signer = test_signer();
        let keys = vec![record("a.test", 1000), record("b.test", 2000)];

        let first = signed_keys("f.json", keys.clone(), &signer).unwrap().unwrap();
        let second = signed_keys("f.json", keys, &signer).unwrap().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_signature_covers_payload_alone() {
        use base64::{engine::general_purpose::STANDARD, Engine};
        use rsa::Pkcs1v15Sign;
        use sha2::{Digest, Sha512};

        let signer = test_signer();
        let keys = vec![record("a.test", 1000)];

        let out = signed_keys("f.json", keys, &signer).unwrap().unwrap();
        let parsed: FileStructure = serde_json::from_slice(&out).unwrap();

        // Re-canonicalize just the payload and verify the detached signature
        let payload_value = serde_json::to_value(&parsed.payload).unwrap();
        let canonical = serde_jcs::to_vec(&payload_value).unwrap();
        let hashed = Sha512::digest(&canonical);
        let signature = STANDARD.decode(&parsed.signature).unwrap();

        signer
            .public_key()
            .verify(Pkcs1v15Sign::new::<Sha512>(), &hashed, &signature)
            .expect("signature must verify against canonical payload");
    }
}
