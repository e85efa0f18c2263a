//! Error types for attestation operations.
//!
//! Every variant falls into exactly one class:
//!
//! - **Validation**: bad input, rejected before anything is signed or chained
//! - **Integrity**: evidence of tampering, always fail closed
//! - **Resource**: key store or evidence store unusable, retried by the caller

use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while recording evidence, issuing claims or
/// composing envelopes.
#[derive(Debug, Error)]
pub enum AttestError {
    /// Confidence outside `[0.0, 1.0]` or not finite.
    #[error("Invalid confidence {value}: must be finite and within [0.0, 1.0]")]
    InvalidConfidence {
        /// Rejected value.
        value: f64,
    },

    /// Malformed hierarchical domain.
    #[error("Invalid domain {domain:?}: {reason}")]
    InvalidDomain {
        /// Rejected domain.
        domain: String,
        /// Reason for rejection.
        reason: String,
    },

    /// Zero or unrepresentable time-to-live.
    #[error("Invalid TTL: {reason}")]
    InvalidTtl {
        /// Reason for rejection.
        reason: String,
    },

    /// A claim references evidence the store does not hold.
    #[error("Dangling evidence reference: {evidence_id}")]
    DanglingReference {
        /// The unresolved evidence id.
        evidence_id: Uuid,
    },

    /// Unknown claim result string.
    #[error("Unknown claim result: {value:?}")]
    UnknownClaimResult {
        /// Rejected value.
        value: String,
    },

    /// Unknown disclosure level string.
    #[error("Unknown disclosure level: {value:?}")]
    UnknownDisclosureLevel {
        /// Rejected value.
        value: String,
    },

    /// An envelope needs at least one claim.
    #[error("Cannot compose an envelope from an empty claim set")]
    EmptyClaimSet,

    /// The same claim was supplied twice.
    #[error("Duplicate claim: {claim_id}")]
    DuplicateClaim {
        /// Repeated claim id.
        claim_id: Uuid,
    },

    /// No evidence item with this id.
    #[error("Evidence not found: {evidence_id}")]
    EvidenceNotFound {
        /// Requested evidence id.
        evidence_id: Uuid,
    },

    /// A view was requested at a wider disclosure level than the envelope
    /// permits.
    #[error("Cannot widen disclosure from {from} to {to}")]
    DisclosureWidening {
        /// Level the envelope was composed at.
        from: String,
        /// Requested level.
        to: String,
    },

    /// Configuration value could not be parsed.
    #[error("Configuration error: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// A signed record failed verification.
    #[error("Signature verification failed for {record} {id}")]
    SignatureInvalid {
        /// Kind of record ("claim", "envelope", "receipt").
        record: &'static str,
        /// Identifier of the record.
        id: String,
    },

    /// A proof or receipt does not match the store.
    #[error("Proof mismatch for evidence {evidence_id}: {reason}")]
    ProofMismatch {
        /// Evidence id the proof refers to.
        evidence_id: Uuid,
        /// What did not match.
        reason: String,
    },

    /// The durable evidence log fails its integrity checks.
    #[error("Evidence log corrupt at line {line}: {reason}")]
    EvidenceLogCorrupt {
        /// One-based line number.
        line: usize,
        /// What failed.
        reason: String,
    },

    /// The evidence store cannot be used.
    #[error("Evidence store unavailable: {reason}")]
    StoreUnavailable {
        /// Reason the store is unavailable.
        reason: String,
    },

    /// Writing or reading the evidence log failed.
    #[error("Persistence failed for {}: {reason}", path.display())]
    Persistence {
        /// Path being accessed.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] otvp_crypto::CryptoError),

    /// Keyring error.
    #[error("Keyring error: {0}")]
    Keyring(#[from] otvp_keyring::KeyringError),
}

impl AttestError {
    /// Create an invalid domain error.
    #[must_use]
    pub fn invalid_domain(domain: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDomain {
            domain: domain.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a store unavailable error.
    #[must_use]
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a persistence error for a path.
    #[must_use]
    pub fn persistence(path: &Path, reason: impl Into<String>) -> Self {
        Self::Persistence {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt log error.
    #[must_use]
    pub fn log_corrupt(line: usize, reason: impl Into<String>) -> Self {
        Self::EvidenceLogCorrupt {
            line,
            reason: reason.into(),
        }
    }

    /// Bad input. Nothing was signed or chained.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        match self {
            Self::InvalidConfidence { .. }
            | Self::InvalidDomain { .. }
            | Self::InvalidTtl { .. }
            | Self::DanglingReference { .. }
            | Self::UnknownClaimResult { .. }
            | Self::UnknownDisclosureLevel { .. }
            | Self::EmptyClaimSet
            | Self::DuplicateClaim { .. }
            | Self::EvidenceNotFound { .. }
            | Self::DisclosureWidening { .. }
            | Self::InvalidConfig { .. } => true,
            Self::Crypto(e) => e.is_input_error(),
            Self::Keyring(otvp_keyring::KeyringError::InvalidKey { .. }) => true,
            _ => false,
        }
    }

    /// Evidence of tampering.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        match self {
            Self::SignatureInvalid { .. }
            | Self::ProofMismatch { .. }
            | Self::EvidenceLogCorrupt { .. } => true,
            Self::Crypto(otvp_crypto::CryptoError::InvalidSignature { .. }) => true,
            Self::Keyring(otvp_keyring::KeyringError::CorruptKey { .. }) => true,
            _ => false,
        }
    }

    /// Store or key material unusable. Fatal to the current operation.
    #[must_use]
    pub fn is_resource(&self) -> bool {
        !self.is_validation() && !self.is_integrity()
    }
}
