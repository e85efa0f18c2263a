//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during encoding, hashing or signing.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid signature format or length.
    #[error("Invalid signature: {reason}")]
    InvalidSignature {
        /// Reason the signature is invalid.
        reason: String,
    },

    /// Invalid public key format or length.
    #[error("Invalid public key: {reason}")]
    InvalidPublicKey {
        /// Reason the key is invalid.
        reason: String,
    },

    /// Invalid private key format or length.
    #[error("Invalid private key: {reason}")]
    InvalidPrivateKey {
        /// Reason the key is invalid.
        reason: String,
    },

    /// Signing operation failed.
    #[error("Signing failed: {reason}")]
    SigningFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// Invalid hex digest.
    #[error("Invalid digest: {reason}")]
    InvalidDigest {
        /// Reason the digest is invalid.
        reason: String,
    },

    /// Record could not be brought into canonical form.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CryptoError {
    /// Create an invalid signature error.
    #[must_use]
    pub fn invalid_signature(reason: impl Into<String>) -> Self {
        Self::InvalidSignature {
            reason: reason.into(),
        }
    }

    /// Create an invalid public key error.
    #[must_use]
    pub fn invalid_public_key(reason: impl Into<String>) -> Self {
        Self::InvalidPublicKey {
            reason: reason.into(),
        }
    }

    /// Create an invalid private key error.
    #[must_use]
    pub fn invalid_private_key(reason: impl Into<String>) -> Self {
        Self::InvalidPrivateKey {
            reason: reason.into(),
        }
    }

    /// Create a signing failed error.
    #[must_use]
    pub fn signing_failed(reason: impl Into<String>) -> Self {
        Self::SigningFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid digest error.
    #[must_use]
    pub fn invalid_digest(reason: impl Into<String>) -> Self {
        Self::InvalidDigest {
            reason: reason.into(),
        }
    }

    /// Whether the error was caused by the input record rather than key
    /// material or the signing backend.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::SerializationError(_) | Self::InvalidDigest { .. })
    }
}
