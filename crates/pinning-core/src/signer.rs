//! Canonical-JSON RSA signer
//!
//! Signatures are byte-stable: the payload is first transformed into its
//! RFC 8785 (JCS) canonical form, so two JSON documents that differ only in
//! key order, whitespace or number formatting produce the same signature.
//!
//! The key is an RSA private key in a PKCS#8 PEM file (`PRIVATE KEY` block).
//! Any other block type or algorithm fails loading.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha512};

use crate::error::{PinningError, Result};

/// Signs JSON payloads with RSASSA-PKCS1-v1_5 over SHA-512 of the
/// canonical (RFC 8785) form.
///
/// Cheap to share behind an `Arc`; `sign` takes `&self` and does no I/O.
pub struct Signer {
    private_key: RsaPrivateKey,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("private_key", &"[redacted]")
            .finish()
    }
}

impl Signer {
    /// Wrap an already-parsed RSA private key.
    pub fn new(private_key: RsaPrivateKey) -> Self {
        Self { private_key }
    }

    /// Load the private key from a PKCS#8 PEM file.
    ///
    /// The PEM block must be of type `PRIVATE KEY` and must contain an RSA
    /// key; Ed25519 or EC keys fail with `KeyLoad`.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let pem = std::fs::read_to_string(path).map_err(|err| {
            PinningError::KeyLoad(format!(
                "failed to read private key file {}: {err}",
                path.display()
            ))
        })?;

        let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .map_err(|err| PinningError::KeyLoad(format!("failed to parse private key: {err}")))?;

        Ok(Self::new(private_key))
    }

    /// The verifying half of the signing key.
    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    /// Sign a JSON payload.
    ///
    /// 1. Canonicalize the payload per RFC 8785
    /// 2. SHA-512 the canonical bytes
    /// 3. RSASSA-PKCS1-v1_5 sign the hash
    /// 4. Return the signature as standard base64 with padding
    ///
    /// The payload must parse as JSON; anything else is a
    /// `Canonicalization` error.
    pub fn sign(&self, payload: &[u8]) -> Result<String> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|err| PinningError::Canonicalization(err.to_string()))?;

        let canonical = serde_jcs::to_vec(&value)
            .map_err(|err| PinningError::Canonicalization(err.to_string()))?;

        let hashed = Sha512::digest(&canonical);

        let signature = self
            .private_key
            .sign(Pkcs1v15Sign::new::<Sha512>(), &hashed)
            .map_err(|err| PinningError::Sign(err.to_string()))?;

        Ok(STANDARD.encode(signature))
    }
}
