//! # fedmeta-crypto
//!
//! Signature verification primitives used by the fedmeta trust engines.
//!
//! Canonicalization of signed content is not performed here. Callers hand in
//! the exact byte range that was signed, the signature value, and the key.
//!
//! ## Supported algorithms
//!
//! | Algorithm      | Identifier                                               |
//! |----------------|----------------------------------------------------------|
//! | Ed25519        | `http://www.w3.org/2021/04/xmldsig-more#eddsa-ed25519`   |
//! | ECDSA P-256    | `http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256`    |

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod types;
mod verify;

#[cfg(feature = "ecdsa-p256")]
mod ecdsa;

#[cfg(feature = "ed25519")]
mod ed25519;

pub use error::CryptoError;
pub use types::SignatureAlgorithm;
pub use verify::{verifier_for, verify_signature, SignatureSigner, SignatureVerifier};

#[cfg(feature = "ecdsa-p256")]
pub use ecdsa::{P256Signer, P256Verifier};

#[cfg(feature = "ed25519")]
pub use ed25519::{Ed25519Signer, Ed25519Verifier};

/// Constant-time byte comparison.
///
/// Compares two byte slices in constant time to prevent timing attacks.
/// Returns `true` if the slices are equal, `false` otherwise.
///
/// # Security
///
/// Used for every comparison of key material against trusted credentials.
/// The length check still returns early; key length is not secret.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// SHA-256 fingerprint of a public key, hex encoded with a `sha256:` prefix.
///
/// Only used for diagnostics; never compare fingerprints instead of keys.
#[must_use]
pub fn key_fingerprint(public_key: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(public_key);
    format!("sha256:{}", hex::encode(digest))
}
