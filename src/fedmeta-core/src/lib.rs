//! # fedmeta-core
//!
//! Federation metadata resolution and signature trust evaluation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     MetadataResolver                          │
//! │                                                               │
//! │  ┌───────────────┐  ┌────────────────┐  ┌─────────────────┐  │
//! │  │ SourceFetcher │─►│ MetadataParser │─►│ MetadataFilter* │  │
//! │  │ (file / http) │  │ (JSON)         │  │ (role, expiry)  │  │
//! │  └───────────────┘  └────────────────┘  └─────────────────┘  │
//! │          │                                      │             │
//! │          ▼                                      ▼             │
//! │   backup file                      ┌──────────────────────┐   │
//! │                                    │ EntityIndex (ArcSwap)│◄──┼── resolve()
//! │  ┌──────────────────┐              └──────────────────────┘   │
//! │  │ Refresh task     │── refresh() ──► pipeline (FIFO mutex)   │
//! │  └──────────────────┘                                         │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!              MetadataCredentialResolver
//!                              │
//!                              ▼
//!   ChainingTrustEngine ─► ExplicitKeyTrustEngine, ...
//! ```
//!
//! ## Failure Isolation
//!
//! - A failed refresh never replaces the published index
//! - Background refresh failures are logged and retried after a backoff
//! - Fail-fast initialization refuses to produce a resolver without data
//! - A trust engine error aborts a chain; it is never read as "untrusted"

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type

pub mod config;
pub mod credential;
pub mod criteria;
pub mod error;
pub mod filter;
pub mod index;
pub mod metadata;
pub mod resolver;
pub mod scheduler;
pub mod source;
pub mod trust;

pub use config::{ResolverConfig, ResolverConfigBuilder};
pub use credential::{
    Credential, CredentialResolver, MetadataCredentialResolver, StaticCredentialResolver,
};
pub use criteria::{CriteriaSet, Criterion};
pub use error::{MetadataError, TrustError};
pub use filter::{EntityRoleFilter, FilterOutcome, MetadataFilter, RequiredValidUntilFilter};
pub use index::{EntityIndex, Resolved};
pub use metadata::{
    EntitiesGroup, EntityDescriptor, JsonMetadataParser, KeyDescriptor, KeyUsage,
    MetadataDocument, MetadataParser, RoleDescriptor, RoleKind,
};
pub use resolver::{MetadataResolver, MetadataResolverBuilder, RefreshFailure, ResolverState};
pub use scheduler::RefreshSchedule;
pub use source::{FetchOrigin, MetadataSource};
pub use trust::{ChainingTrustEngine, ExplicitKeyTrustEngine, Signature, SignatureTrustEngine};

pub use fedmeta_crypto::SignatureAlgorithm;
