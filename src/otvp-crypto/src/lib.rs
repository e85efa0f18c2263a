//! # otvp-crypto
//!
//! Cryptographic primitives for the OTVP trust attestation engine.
//!
//! Everything that is hashed or signed passes through one path:
//!
//! ```text
//! record ──encode()──▶ canonical bytes ──┬──▶ SHA-256 (0x00 leaf / 0x01 node)
//!                                        └──▶ Ed25519 signature (base64url)
//! ```
//!
//! ## Canonical Encoding
//!
//! Records are encoded with RFC 8785 JSON Canonicalization (sorted keys at
//! every nesting level, no whitespace, ES6 number formatting, UTF-8). The same
//! logical value produces byte-identical output on every platform, which is
//! what keeps Merkle proofs and signatures reproducible across machines.
//!
//! ## Domain Separation
//!
//! Merkle leaves and internal nodes are hashed under distinct one-byte tags:
//!
//! ```text
//! leaf = SHA-256(0x00 || encode(item))
//! node = SHA-256(0x01 || left || right)
//! ```
//!
//! ## Fail-Closed Verification
//!
//! [`verify_record`] never returns an error: malformed signatures, wrong key
//! lengths and tampered records all verify as `false`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
mod ed25519;
mod error;
pub mod hash;
mod signing;
mod types;

pub use canonical::{encode, encode_value, encode_without_field, MAX_SAFE_INTEGER};
pub use ed25519::{Ed25519Signer, Ed25519Verifier};
pub use error::CryptoError;
pub use hash::{leaf_hash, node_hash, sha256, LEAF_TAG, NODE_TAG};
pub use signing::{
    decode_signature, encode_signature, sign_record, verify_record, RecordSigner,
    SignatureVerifier,
};
pub use types::{Hash256, SignatureAlgorithm};

/// Constant-time byte comparison.
///
/// Compares two byte slices in constant time to prevent timing attacks.
/// Returns `true` if the slices are equal, `false` otherwise.
///
/// # Security
///
/// Use this for every comparison of digests and signatures. The length
/// check still returns early; lengths of digests are public.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
