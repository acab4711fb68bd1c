//! Signer and verifier traits plus algorithm dispatch.

use crate::error::CryptoError;
use crate::types::SignatureAlgorithm;

/// Trait for signature creation.
///
/// Only tooling and tests sign; the resolver side only ever verifies.
pub trait SignatureSigner {
    /// Get the algorithm used by this signer.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Get the public key.
    fn public_key(&self) -> Result<Vec<u8>, CryptoError>;

    /// Sign data and return the signature.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Trait for detached signature verification over a byte range.
pub trait SignatureVerifier: Send + Sync {
    /// Get the algorithm this verifier checks.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Verify a signature against a public key.
    ///
    /// Returns `Ok(false)` for a well-formed signature that does not verify,
    /// and an error for malformed keys or signatures.
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8])
        -> Result<bool, CryptoError>;
}

/// Get the verifier for an algorithm.
///
/// # Errors
///
/// Returns `CryptoError::UnsupportedAlgorithm` if support for the algorithm
/// was not compiled in.
pub fn verifier_for(
    algorithm: SignatureAlgorithm,
) -> Result<Box<dyn SignatureVerifier>, CryptoError> {
    match algorithm {
        #[cfg(feature = "ed25519")]
        SignatureAlgorithm::Ed25519 => Ok(Box::new(crate::Ed25519Verifier::new())),
        #[cfg(feature = "ecdsa-p256")]
        SignatureAlgorithm::EcdsaP256 => Ok(Box::new(crate::P256Verifier::new())),
        #[allow(unreachable_patterns)]
        other => Err(CryptoError::unsupported_algorithm(other.name())),
    }
}

/// Verify a detached signature with the verifier for `algorithm`.
///
/// # Errors
///
/// Returns an error if the algorithm is unsupported or the key or signature
/// is malformed.
pub fn verify_signature(
    algorithm: SignatureAlgorithm,
    public_key: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    verifier_for(algorithm)?.verify(public_key, data, signature)
}
