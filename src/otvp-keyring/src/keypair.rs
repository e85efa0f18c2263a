//! Ed25519 agent key pair.
//!
//! The private half never leaves this type except as PKCS#8 PEM written to a
//! `0600` file by [`AgentKeyPair::persist`]. There is no `Serialize` impl,
//! `Debug` is redacted, and the signing key is zeroized on drop.

use std::fmt;
use std::path::{Path, PathBuf};

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use otvp_crypto::{CryptoError, RecordSigner, SignatureAlgorithm};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::KeyringError;
use crate::store;
use crate::types::{KeyInfo, KeyStorage};

/// Agent signing key pair.
///
/// Signing takes `&self`, so one key pair can be shared behind an `Arc` by
/// any number of concurrent signers without ever being mutated.
pub struct AgentKeyPair {
    signing_key: SigningKey,
    storage: KeyStorage,
}

impl AgentKeyPair {
    /// Generate a new key pair from the OS entropy source.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::KeyGenerationFailed`] only if the entropy
    /// source fails.
    pub fn generate() -> Result<Self, KeyringError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(&mut seed[..])
            .map_err(|e| KeyringError::KeyGenerationFailed {
                reason: format!("OS entropy source failed: {e}"),
            })?;

        let keypair = Self {
            signing_key: SigningKey::from_bytes(&seed),
            storage: KeyStorage::Ephemeral,
        };

        tracing::info!(key_id = %keypair.key_id(), "AgentKeyPair: generated new Ed25519 key");
        Ok(keypair)
    }

    /// Create a key pair from raw 32-byte seed material.
    ///
    /// # Errors
    ///
    /// Returns error if `seed` is not exactly 32 bytes.
    pub fn from_seed(seed: &[u8]) -> Result<Self, KeyringError> {
        if seed.len() != 32 {
            tracing::error!(key_len = seed.len(), "AgentKeyPair: invalid seed length");
            return Err(KeyringError::invalid_key(format!(
                "Ed25519 seed must be 32 bytes, got {} bytes",
                seed.len()
            )));
        }

        let mut bytes = Zeroizing::new([0u8; 32]);
        bytes.copy_from_slice(seed);

        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
            storage: KeyStorage::Ephemeral,
        })
    }

    /// Write the private key as PKCS#8 PEM to `path`.
    ///
    /// The file is created with mode `0600` under a random temporary name,
    /// synced, then linked into place only if `path` is still free, so
    /// `path` is never observed half-written and an existing key is never
    /// overwritten, even by a concurrent writer.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::KeyAlreadyExists`] if `path` exists, or
    /// [`KeyringError::PersistenceFailed`] on I/O failure.
    pub fn persist(&self, path: &Path) -> Result<(), KeyringError> {
        let pem = self
            .signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyringError::persistence(path, format!("PKCS#8 encoding: {e}")))?;

        store::write_secret_file(path, pem.as_bytes())?;

        tracing::info!(
            key_id = %self.key_id(),
            path = %path.display(),
            "AgentKeyPair: private key persisted"
        );
        Ok(())
    }

    /// Load a private key previously written by [`persist`](Self::persist).
    ///
    /// # Errors
    ///
    /// - [`KeyringError::KeyNotFound`] if `path` does not exist
    /// - [`KeyringError::InsecurePermissions`] if group/other can read it (unix)
    /// - [`KeyringError::CorruptKey`] if the PEM does not decode
    /// - [`KeyringError::PersistenceFailed`] on other I/O failures
    pub fn load(path: &Path) -> Result<Self, KeyringError> {
        let pem = store::read_secret_file(path)?;

        let signing_key = SigningKey::from_pkcs8_pem(&pem)
            .map_err(|e| KeyringError::corrupt(path, format!("PKCS#8 decoding: {e}")))?;

        let keypair = Self {
            signing_key,
            storage: KeyStorage::File {
                path: path.to_path_buf(),
            },
        };

        tracing::info!(
            key_id = %keypair.key_id(),
            path = %path.display(),
            "AgentKeyPair: private key loaded"
        );
        Ok(keypair)
    }

    /// The public half, derived from the private key.
    #[must_use]
    pub fn public_key(&self) -> AgentPublicKey {
        AgentPublicKey(self.signing_key.verifying_key())
    }

    /// Short key identifier.
    #[must_use]
    pub fn key_id(&self) -> String {
        self.public_key().key_id()
    }

    /// Public description of this key pair.
    #[must_use]
    pub fn info(&self) -> KeyInfo {
        let public_key = self.public_key();
        KeyInfo {
            key_id: public_key.key_id(),
            algorithm: self.algorithm(),
            public_key: public_key.to_hex(),
            storage: self.storage.clone(),
        }
    }

    /// Record that this key now lives at `path`.
    pub(crate) fn with_storage_path(mut self, path: PathBuf) -> Self {
        self.storage = KeyStorage::File { path };
        self
    }
}

impl RecordSigner for AgentKeyPair {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ed25519
    }

    fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.signing_key.verifying_key().to_bytes().to_vec())
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.signing_key.sign(data).to_bytes().to_vec())
    }
}

impl fmt::Debug for AgentKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentKeyPair")
            .field("key_id", &self.key_id())
            .field("storage", &self.storage)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

/// Agent public key. Freely distributable.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AgentPublicKey(VerifyingKey);

impl AgentPublicKey {
    /// Parse raw 32-byte public key bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid Ed25519 point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyringError> {
        let raw: [u8; 32] = bytes.try_into().map_err(|_| {
            KeyringError::invalid_key(format!(
                "Ed25519 public key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        VerifyingKey::from_bytes(&raw)
            .map(Self)
            .map_err(|e| KeyringError::invalid_key(e.to_string()))
    }

    /// Parse a hex-encoded public key.
    ///
    /// # Errors
    ///
    /// Returns error if the string is not hex or not a valid key.
    pub fn from_hex(value: &str) -> Result<Self, KeyringError> {
        let bytes =
            hex::decode(value).map_err(|e| KeyringError::invalid_key(format!("hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Parse an SPKI PEM public key.
    ///
    /// # Errors
    ///
    /// Returns error if the PEM does not decode to an Ed25519 key.
    pub fn from_pem(pem: &str) -> Result<Self, KeyringError> {
        VerifyingKey::from_public_key_pem(pem)
            .map(Self)
            .map_err(|e| KeyringError::invalid_key(format!("SPKI decoding: {e}")))
    }

    /// Raw 32-byte public key.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Lowercase hex encoding of the raw key.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// SPKI PEM encoding.
    ///
    /// # Errors
    ///
    /// Returns error if DER encoding fails.
    pub fn to_pem(&self) -> Result<String, KeyringError> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyringError::invalid_key(format!("SPKI encoding: {e}")))
    }

    /// Short key identifier: first 8 bytes of SHA-256 over the raw key, hex.
    #[must_use]
    pub fn key_id(&self) -> String {
        let digest = Sha256::digest(self.to_bytes());
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for AgentPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentPublicKey({})", self.to_hex())
    }
}

impl fmt::Display for AgentPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for AgentPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AgentPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
