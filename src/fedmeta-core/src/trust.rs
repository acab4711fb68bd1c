//! Signature trust evaluation.
//!
//! A [`SignatureTrustEngine`] decides whether a signature was produced by a
//! key trusted for a given [`CriteriaSet`]. Engines compose through
//! [`ChainingTrustEngine`], which consults its members in order:
//!
//! - the first member that returns `Ok(true)` decides, later members are skipped
//! - `Ok(false)` moves on to the next member
//! - an `Err` aborts the evaluation immediately
//!
//! `Ok(false)` from every member, or an empty chain, means untrusted.

use std::sync::Arc;

use fedmeta_crypto::{constant_time_eq, verify_signature, CryptoError, SignatureAlgorithm};
use tracing::{debug, instrument, warn};

use crate::credential::{Credential, CredentialResolver};
use crate::criteria::{CriteriaSet, Criterion};
use crate::error::TrustError;
use crate::metadata::KeyUsage;

/// A signature over already canonicalized content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Signature algorithm identifier URI.
    pub algorithm: String,
    /// Exact bytes that were signed.
    pub signed_content: Vec<u8>,
    /// Signature value.
    pub value: Vec<u8>,
    /// Credentials carried inside the signature, if any.
    pub key_info: Vec<Credential>,
}

impl Signature {
    /// Create a signature with no embedded key info.
    pub fn new(
        algorithm: impl Into<String>,
        signed_content: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            algorithm: algorithm.into(),
            signed_content: signed_content.into(),
            value: value.into(),
            key_info: Vec::new(),
        }
    }
}

/// Decides whether signatures are trusted.
pub trait SignatureTrustEngine: Send + Sync {
    /// Validate a signature object against the trust basis.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation itself fails; this is distinct from an
    /// untrusted signature, which is `Ok(false)`.
    fn validate(&self, signature: &Signature, trust_basis: &CriteriaSet) -> Result<bool, TrustError>;

    /// Validate a raw signature over `content` made with `candidate`.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation itself fails.
    fn validate_raw(
        &self,
        signature: &[u8],
        content: &[u8],
        algorithm_uri: &str,
        trust_basis: &CriteriaSet,
        candidate: &Credential,
    ) -> Result<bool, TrustError>;

    /// Resolver for credentials carried in key info, if the engine has one.
    fn key_info_resolver(&self) -> Option<&dyn CredentialResolver> {
        None
    }

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Ordered composition of trust engines.
#[derive(Clone, Default)]
pub struct ChainingTrustEngine {
    chain: Vec<Arc<dyn SignatureTrustEngine>>,
}

impl ChainingTrustEngine {
    /// Build a chain; `None` entries are skipped.
    pub fn new<I>(engines: I) -> Self
    where
        I: IntoIterator<Item = Option<Arc<dyn SignatureTrustEngine>>>,
    {
        Self {
            chain: engines.into_iter().flatten().collect(),
        }
    }

    /// The members of the chain, in evaluation order.
    #[must_use]
    pub fn chain(&self) -> &[Arc<dyn SignatureTrustEngine>] {
        &self.chain
    }

    fn first_trusting<F>(&self, mut check: F) -> Result<bool, TrustError>
    where
        F: FnMut(&dyn SignatureTrustEngine) -> Result<bool, TrustError>,
    {
        for engine in &self.chain {
            if check(engine.as_ref())? {
                debug!(engine = engine.name(), "Signature trusted by chain member");
                return Ok(true);
            }
        }
        debug!(members = self.chain.len(), "No chain member trusted the signature");
        Ok(false)
    }
}

impl SignatureTrustEngine for ChainingTrustEngine {
    #[instrument(skip_all, fields(members = self.chain.len()))]
    fn validate(&self, signature: &Signature, trust_basis: &CriteriaSet) -> Result<bool, TrustError> {
        self.first_trusting(|engine| engine.validate(signature, trust_basis))
    }

    #[instrument(skip_all, fields(members = self.chain.len()))]
    fn validate_raw(
        &self,
        signature: &[u8],
        content: &[u8],
        algorithm_uri: &str,
        trust_basis: &CriteriaSet,
        candidate: &Credential,
    ) -> Result<bool, TrustError> {
        self.first_trusting(|engine| {
            engine.validate_raw(signature, content, algorithm_uri, trust_basis, candidate)
        })
    }
}

impl std::fmt::Debug for ChainingTrustEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.chain.iter().map(|engine| engine.name()))
            .finish()
    }
}

/// Trusts signatures that verify under an explicitly trusted key.
///
/// Trusted keys come from a [`CredentialResolver`]. Without a `Usage`
/// criterion, signing keys are requested.
#[derive(Clone)]
pub struct ExplicitKeyTrustEngine {
    resolver: Arc<dyn CredentialResolver>,
}

impl ExplicitKeyTrustEngine {
    /// Create an engine over `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<dyn CredentialResolver>) -> Self {
        Self { resolver }
    }

    fn trusted_credentials(&self, trust_basis: &CriteriaSet) -> Result<Vec<Credential>, TrustError> {
        let has_usage = trust_basis
            .iter()
            .any(|c| matches!(c, Criterion::Usage(_)));
        if has_usage {
            self.resolver.resolve(trust_basis)
        } else {
            let basis = trust_basis.clone().with(Criterion::Usage(KeyUsage::Signing));
            self.resolver.resolve(&basis)
        }
    }
}

fn algorithm_from_uri(uri: &str) -> Result<SignatureAlgorithm, TrustError> {
    SignatureAlgorithm::from_uri(uri).map_err(|_| TrustError::UnsupportedAlgorithm {
        algorithm: uri.to_owned(),
    })
}

impl SignatureTrustEngine for ExplicitKeyTrustEngine {
    fn validate(&self, signature: &Signature, trust_basis: &CriteriaSet) -> Result<bool, TrustError> {
        let algorithm = algorithm_from_uri(&signature.algorithm)?;
        let trusted = self.trusted_credentials(trust_basis)?;
        if trusted.is_empty() {
            debug!(criteria = %trust_basis, "No trusted credentials");
            return Ok(false);
        }

        for credential in trusted.iter().filter(|c| c.algorithm == algorithm) {
            match verify_signature(
                algorithm,
                &credential.public_key,
                &signature.signed_content,
                &signature.value,
            ) {
                Ok(true) => {
                    debug!(key = %credential.fingerprint(), "Signature verified with trusted key");
                    return Ok(true);
                },
                Ok(false) => {},
                // One unusable published key must not hide the others
                Err(CryptoError::InvalidPublicKey { reason }) => {
                    warn!(
                        entity_id = credential.entity_id.as_deref().unwrap_or("-"),
                        key = %credential.fingerprint(),
                        %reason,
                        "Skipping unusable trusted key"
                    );
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    fn validate_raw(
        &self,
        signature: &[u8],
        content: &[u8],
        algorithm_uri: &str,
        trust_basis: &CriteriaSet,
        candidate: &Credential,
    ) -> Result<bool, TrustError> {
        let algorithm = algorithm_from_uri(algorithm_uri)?;
        let trusted = self.trusted_credentials(trust_basis)?;

        let is_trusted = trusted.iter().any(|c| {
            c.algorithm == candidate.algorithm && constant_time_eq(&c.public_key, &candidate.public_key)
        });
        if !is_trusted {
            debug!(key = %candidate.fingerprint(), "Candidate key is not trusted");
            return Ok(false);
        }
        if candidate.algorithm != algorithm {
            return Ok(false);
        }

        Ok(verify_signature(algorithm, &candidate.public_key, content, signature)?)
    }
}
