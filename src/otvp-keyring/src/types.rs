//! Descriptive types for loaded keys.

use std::path::PathBuf;

use otvp_crypto::SignatureAlgorithm;
use serde::{Deserialize, Serialize};

/// Where a key pair's private half lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyStorage {
    /// Generated in memory and not (yet) persisted.
    Ephemeral,

    /// Loaded from or persisted to a PKCS#8 PEM file.
    File {
        /// Path of the private key file.
        path: PathBuf,
    },
}

/// Public description of a key pair. Never contains private material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Short key identifier (first 8 bytes of SHA-256 over the public key, hex).
    pub key_id: String,

    /// Signature algorithm.
    pub algorithm: SignatureAlgorithm,

    /// Raw public key, hex.
    pub public_key: String,

    /// Storage backend of the private key.
    pub storage: KeyStorage,
}
