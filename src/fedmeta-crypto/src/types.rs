//! Signature algorithm identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// Ed25519 algorithm identifier (RFC 9231).
const URI_EDDSA_ED25519: &str = "http://www.w3.org/2021/04/xmldsig-more#eddsa-ed25519";

/// ECDSA over P-256 with SHA-256 (RFC 4051).
const URI_ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";

/// Signature algorithm of a key or signature.
///
/// Metadata documents name algorithms by their short name; signatures carry
/// the URI form. Both are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SignatureAlgorithm {
    /// Ed25519 Edwards curve
    #[serde(rename = "ed25519", alias = "http://www.w3.org/2021/04/xmldsig-more#eddsa-ed25519")]
    Ed25519 = 1,

    /// ECDSA with NIST P-256 (secp256r1) and SHA-256
    #[serde(
        rename = "ecdsa-p256",
        alias = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"
    )]
    EcdsaP256 = 2,
}

impl SignatureAlgorithm {
    /// Short name used in metadata documents.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::EcdsaP256 => "ecdsa-p256",
        }
    }

    /// Algorithm identifier URI used in signatures.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::Ed25519 => URI_EDDSA_ED25519,
            Self::EcdsaP256 => URI_ECDSA_SHA256,
        }
    }

    /// OID for this algorithm (for X.509/PKCS)
    #[must_use]
    pub const fn oid(&self) -> &'static str {
        match self {
            Self::EcdsaP256 => "1.2.840.10045.4.3.2", // ecdsa-with-SHA256
            Self::Ed25519 => "1.3.101.112",           // id-Ed25519
        }
    }

    /// Look up an algorithm by its identifier URI.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::UnsupportedAlgorithm` for any other identifier.
    pub fn from_uri(uri: &str) -> Result<Self, CryptoError> {
        match uri {
            URI_EDDSA_ED25519 => Ok(Self::Ed25519),
            URI_ECDSA_SHA256 => Ok(Self::EcdsaP256),
            other => Err(CryptoError::unsupported_algorithm(other)),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(Self::Ed25519),
            "ecdsa-p256" => Ok(Self::EcdsaP256),
            other => Self::from_uri(other),
        }
    }
}
