//! Ed25519 (PureEdDSA) signatures as used by `eddsa-ed25519` XML signatures.
//!
//! Keys published in metadata are the raw 32-byte encoded curve point from
//! RFC 8032 section 5.1.5, not a SubjectPublicKeyInfo wrapper. Signature
//! values are the 64-byte `R || S` concatenation over the signed bytes with
//! no prehash.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::OsRng;

use crate::error::CryptoError;
use crate::types::SignatureAlgorithm;
use crate::verify::{SignatureSigner, SignatureVerifier};

const PUBLIC_KEY_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;

fn decode_signature(bytes: &[u8]) -> Result<Signature, CryptoError> {
    let raw: [u8; SIGNATURE_LEN] = bytes.try_into().map_err(|_| {
        CryptoError::invalid_signature(format!(
            "Ed25519 signature must be {SIGNATURE_LEN} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(Signature::from_bytes(&raw))
}

fn decode_public_key(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    let raw: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
        CryptoError::invalid_public_key(format!(
            "Ed25519 public key must be {PUBLIC_KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&raw).map_err(|e| CryptoError::invalid_public_key(e.to_string()))
}

/// Ed25519 signing key.
///
/// Metadata consumers never sign; this exists for tooling that produces
/// signed content and for tests.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Generate a key from the OS random source.
    #[must_use]
    pub fn random() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Derive a key from a 32-byte seed.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidPrivateKey` for any other seed length.
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let seed: [u8; 32] = seed.try_into().map_err(|_| {
            CryptoError::invalid_private_key(format!(
                "Ed25519 seed must be 32 bytes, got {}",
                seed.len()
            ))
        })?;
        Ok(Self {
            key: SigningKey::from_bytes(&seed),
        })
    }
}

impl SignatureSigner for Ed25519Signer {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ed25519
    }

    fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.key.verifying_key().as_bytes().to_vec())
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.key.sign(data).to_bytes().to_vec())
    }
}

/// Ed25519 verifier.
///
/// Uses strict verification: small-order keys and non-canonical `S` values
/// do not verify.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    /// Create a verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ed25519
    }

    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        // Signature first so a malformed signature is reported whatever the key
        let signature = decode_signature(signature)?;
        let key = decode_public_key(public_key)?;
        Ok(key.verify_strict(data, &signature).is_ok())
    }
}
