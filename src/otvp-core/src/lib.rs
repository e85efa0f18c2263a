//! # otvp-core
//!
//! Trust attestation engine for continuous compliance: an append-only Merkle
//! evidence store, signed claims over that evidence, and signed trust
//! envelopes that aggregate claims into a composite trust level.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     AttestationEngine                         │
//! │                                                               │
//! │  control check output                                         │
//! │          │                                                    │
//! │          ▼                                                    │
//! │  ┌──────────────────┐   receipt   ┌──────────────────┐       │
//! │  │  EvidenceStore   │────────────▶│  AgentKeyPair    │       │
//! │  │  (Merkle arena)  │             │  (Ed25519)       │       │
//! │  └──────────────────┘             └──────────────────┘       │
//! │          │ evidence refs                   │ signs            │
//! │          ▼                                 ▼                  │
//! │  ┌──────────────────┐             ┌──────────────────┐       │
//! │  │      Claim       │────────────▶│  TrustEnvelope   │       │
//! │  │  (one domain)    │   compose   │  (control×product)│      │
//! │  └──────────────────┘             └──────────────────┘       │
//! │                                            │ verify           │
//! │                                            ▼                  │
//! │                                   EnvelopeView (disclosure)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! - **Tamper-evident**: every evidence item is a Merkle leaf; every claim,
//!   envelope and receipt is signed over its canonical encoding
//! - **Fail-closed**: verification failures are errors or `false`, never a
//!   degraded success
//! - **No partial records**: validation precedes signing and persistence
//!   precedes tree mutation
//! - **Disclosure after verification**: reduced views are projections of a
//!   verified envelope and are never signed themselves

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod claims;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod evidence;
pub mod receipt;

pub use claims::{
    build_claim, AgentIdentity, Claim, ClaimRequest, ClaimResult, ClaimScope,
    DEFAULT_CLAIM_TTL_SECS,
};
pub use config::EngineConfig;
pub use engine::AttestationEngine;
pub use envelope::{
    compose, composite_confidence, ClaimSummary, ClaimsOnlyView, ControlDescriptor,
    DisclosureLevel, DomainScore, EnvelopeRequest, EnvelopeView, EvidenceSummary, TrustEnvelope,
    TrustLevel, VerifiedEnvelope, ZeroKnowledgeView, DEFAULT_ENVELOPE_TTL_SECS,
};
pub use error::AttestError;
pub use evidence::{
    validate_domain, EvidenceItem, EvidenceStore, MerkleProof, ProofStep, SiblingPosition,
    StoreSnapshot,
};
pub use receipt::EvidenceReceipt;

pub use otvp_crypto::Hash256;
pub use otvp_keyring::{AgentKeyPair, AgentPublicKey, KeyStore};
