//! Error types for key management.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur while generating, persisting or loading keys.
#[derive(Debug, Error)]
pub enum KeyringError {
    /// The OS entropy source failed.
    #[error("Key generation failed: {reason}")]
    KeyGenerationFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// No key exists at the given location.
    #[error("Key not found: {}", path.display())]
    KeyNotFound {
        /// Location that was searched.
        path: PathBuf,
    },

    /// A key already exists and would be overwritten.
    #[error("Key already exists: {}", path.display())]
    KeyAlreadyExists {
        /// Location of the existing key.
        path: PathBuf,
    },

    /// Stored key material could not be decoded.
    #[error("Corrupt key at {}: {reason}", path.display())]
    CorruptKey {
        /// Location of the corrupt key.
        path: PathBuf,
        /// Reason the key could not be decoded.
        reason: String,
    },

    /// The private key file is readable by group or other.
    #[error("Insecure permissions on {}: mode {mode:o}, require 0600 or stricter", path.display())]
    InsecurePermissions {
        /// Location of the key file.
        path: PathBuf,
        /// Observed permission bits.
        mode: u32,
    },

    /// Reading or writing the key store failed.
    #[error("Persistence failed for {}: {reason}", path.display())]
    PersistenceFailed {
        /// Location being accessed.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// Invalid key data supplied by the caller.
    #[error("Invalid key: {reason}")]
    InvalidKey {
        /// Reason the key is invalid.
        reason: String,
    },
}

impl KeyringError {
    /// Create a persistence error for a path.
    #[must_use]
    pub fn persistence(path: &Path, reason: impl Into<String>) -> Self {
        Self::PersistenceFailed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt key error for a path.
    #[must_use]
    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::CorruptKey {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create an invalid key error.
    #[must_use]
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Whether the key store itself could not be used (missing, unreadable,
    /// unwritable). Callers may retry these after fixing the environment.
    #[must_use]
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound { .. }
                | Self::PersistenceFailed { .. }
                | Self::InsecurePermissions { .. }
                | Self::KeyAlreadyExists { .. }
        )
    }
}
