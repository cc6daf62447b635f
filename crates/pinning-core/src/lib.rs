//! Core types for dynamic SSL public-key pinning
//!
//! This crate holds everything the pinning service and its storage backends
//! agree on:
//! - `PinTarget` / `PinRecord`: the configured probe target and the pin
//!   observed for it
//! - `FileKeys` / `FileStructure`: the signed manifest wire format
//! - `Signer`: canonical-JSON (RFC 8785) RSA-SHA512 detached signatures
//! - `signed_keys`: assembling a sorted, signed manifest for one file
//!
//! ## Manifest format
//!
//! ```json
//! {
//!   "payload": { "keys": [ { "fqdn": "...", "key": "...", "expire": 123 } ] },
//!   "signature": "base64(RSASSA-PKCS1-v1_5(SHA-512(JCS(payload))))"
//! }
//! ```
//!
//! The signature always covers the canonical form of `payload` alone, never
//! the enclosing structure, so verifiers can recover the signed bytes from
//! the manifest itself.

pub mod error;
pub mod manifest;
pub mod record;
pub mod signer;

pub use error::{PinningError, Result};
pub use manifest::signed_keys;
pub use record::{FileKeys, FileStructure, PinRecord, PinTarget};
pub use signer::Signer;
