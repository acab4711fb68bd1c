//! ECDSA over NIST P-256 with SHA-256, as used by `ecdsa-sha256` XML signatures.
//!
//! Keys published in metadata are SEC1 encoded points, either uncompressed
//! (`0x04 || X || Y`, 65 bytes) or compressed (`0x02`/`0x03 || X`, 33 bytes).
//!
//! XML signature carries ECDSA values as the fixed-width concatenation
//! `r || s`, each a 32-byte big-endian integer (RFC 4050 section 3.3), not the
//! ASN.1 DER `SEQUENCE { r, s }` used by X.509 and TLS. A DER encoded value is
//! reported as a malformed signature.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;

use crate::error::CryptoError;
use crate::types::SignatureAlgorithm;
use crate::verify::{SignatureSigner, SignatureVerifier};

/// Width of the `r || s` signature value.
const SIGNATURE_LEN: usize = 64;

fn decode_signature(bytes: &[u8]) -> Result<Signature, CryptoError> {
    if bytes.len() != SIGNATURE_LEN {
        return Err(CryptoError::invalid_signature(format!(
            "P-256 signature must be {SIGNATURE_LEN} bytes of r || s, got {}",
            bytes.len()
        )));
    }
    Signature::from_slice(bytes).map_err(|e| CryptoError::invalid_signature(e.to_string()))
}

fn decode_public_key(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    VerifyingKey::from_sec1_bytes(bytes).map_err(|_| {
        CryptoError::invalid_public_key(format!(
            "P-256 public key is not a SEC1 point on the curve ({} bytes)",
            bytes.len()
        ))
    })
}

/// P-256 signing key.
pub struct P256Signer {
    key: SigningKey,
}

impl P256Signer {
    /// Generate a key from the OS random source.
    #[must_use]
    pub fn random() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Load a key from its 32-byte big-endian secret scalar.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidPrivateKey` if the scalar is the wrong
    /// size, zero, or not below the curve order.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        SigningKey::from_slice(bytes)
            .map(|key| Self { key })
            .map_err(|e| CryptoError::invalid_private_key(e.to_string()))
    }
}

impl SignatureSigner for P256Signer {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::EcdsaP256
    }

    /// Uncompressed SEC1 point.
    fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.key.verifying_key().to_encoded_point(false).as_bytes().to_vec())
    }

    /// Fixed-width `r || s`.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature: Signature = self.key.sign(data);
        Ok(signature.to_bytes().to_vec())
    }
}

/// P-256 verifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct P256Verifier;

impl P256Verifier {
    /// Create a verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SignatureVerifier for P256Verifier {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::EcdsaP256
    }

    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        let signature = decode_signature(signature)?;
        let key = decode_public_key(public_key)?;
        Ok(key.verify(data, &signature).is_ok())
    }
}
