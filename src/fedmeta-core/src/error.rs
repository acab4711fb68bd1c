//! Error types for metadata resolution and trust evaluation.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving metadata.
///
/// The variants fall into three groups, exposed through the classification
/// predicates below:
///
/// - **fatal**: configuration and fail-fast initialization failures
/// - **recoverable**: fetch, parse and document rejection inside a refresh cycle
/// - **caller**: malformed criteria, ambiguous matches, use after shutdown
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Invalid source, backup path or resolver configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message.
        message: String,
    },

    /// The first refresh cycle failed and the resolver is fail-fast.
    #[error("Resolver '{resolver_id}' failed to initialize: {source}")]
    Initialization {
        /// Diagnostic identifier of the resolver.
        resolver_id: String,
        /// The pipeline failure.
        #[source]
        source: Box<MetadataError>,
    },

    /// Metadata file does not exist.
    #[error("Metadata file not found: {}", path.display())]
    NotFound {
        /// Path that was read.
        path: PathBuf,
    },

    /// Metadata file exists but cannot be read.
    #[error("Metadata file {} is unreadable: {reason}", path.display())]
    Unreadable {
        /// Path that was read.
        path: PathBuf,
        /// Reason the file could not be read.
        reason: String,
    },

    /// Network failure, timeout or non-success HTTP status.
    #[error("Fetch error: {message}")]
    Fetch {
        /// Error message.
        message: String,
    },

    /// Malformed metadata content.
    #[error("Parse error: {message}")]
    Parse {
        /// Error message.
        message: String,
    },

    /// A single entity was rejected; the rest of the document is kept.
    #[error("Entity '{entity_id}' rejected: {reason}")]
    Validation {
        /// The rejected entity.
        entity_id: String,
        /// Reason for rejection.
        reason: String,
    },

    /// A filter rejected the whole document.
    #[error("Metadata document rejected: {reason}")]
    DocumentRejected {
        /// Reason for rejection.
        reason: String,
    },

    /// An on-demand refresh failed; the previous snapshot is still served.
    #[error("Refresh of resolver '{resolver_id}' failed: {source}")]
    Refresh {
        /// Diagnostic identifier of the resolver.
        resolver_id: String,
        /// The pipeline failure.
        #[source]
        source: Box<MetadataError>,
    },

    /// The resolver has been shut down.
    #[error("Resolver '{resolver_id}' has been shut down")]
    ShutDown {
        /// Diagnostic identifier of the resolver.
        resolver_id: String,
    },

    /// Criteria set with no criteria.
    #[error("Criteria set must not be empty")]
    EmptyCriteria,

    /// Criterion name that is not recognized.
    #[error("Unknown criterion: {name}")]
    UnknownCriterion {
        /// The unrecognized name.
        name: String,
    },

    /// Criterion with a value that cannot be interpreted.
    #[error("Invalid value '{value}' for criterion {name}")]
    InvalidCriterion {
        /// Criterion name.
        name: String,
        /// Offending value.
        value: String,
    },

    /// `resolve_single` matched more than one entity without an identifier criterion.
    #[error("Criteria matched {matches} entities; add an entityID criterion")]
    AmbiguousMatch {
        /// Number of matching entities.
        matches: usize,
    },
}

impl MetadataError {
    /// Create a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a fetch error.
    #[must_use]
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
        }
    }

    /// Create a parse error.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Check if this error aborts the caller and must not be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Initialization { .. })
    }

    /// Check if this error is handled inside a refresh cycle (logged, state kept).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_fetch_error()
            || matches!(
                self,
                Self::Parse { .. } | Self::Validation { .. } | Self::DocumentRejected { .. }
            )
    }

    /// Check if this error was caused by how the resolver was called.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::ShutDown { .. }
                | Self::EmptyCriteria
                | Self::UnknownCriterion { .. }
                | Self::InvalidCriterion { .. }
                | Self::AmbiguousMatch { .. }
        )
    }

    /// Check if this error came from the source fetcher.
    #[must_use]
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Unreadable { .. } | Self::Fetch { .. }
        )
    }

    /// The pipeline failure behind an initialization or refresh error.
    #[must_use]
    pub fn root_cause(&self) -> &MetadataError {
        match self {
            Self::Initialization { source, .. } | Self::Refresh { source, .. } => {
                source.root_cause()
            },
            other => other,
        }
    }
}

/// Errors raised by trust engines and credential resolvers.
///
/// Any of these aborts a chained evaluation; an internal failure is not
/// evidence that a signature is untrusted.
#[derive(Debug, Error)]
pub enum TrustError {
    /// Malformed key or signature material.
    #[error("Crypto error: {0}")]
    Crypto(#[from] fedmeta_crypto::CryptoError),

    /// Signature algorithm identifier that no verifier handles.
    #[error("Unsupported signature algorithm: {algorithm}")]
    UnsupportedAlgorithm {
        /// The algorithm identifier.
        algorithm: String,
    },

    /// Trusted credentials could not be resolved.
    #[error("Credential resolution failed: {message}")]
    CredentialResolution {
        /// Error message.
        message: String,
    },
}

impl From<MetadataError> for TrustError {
    fn from(e: MetadataError) -> Self {
        Self::CredentialResolution {
            message: e.to_string(),
        }
    }
}
