//! Domain-separated SHA-256 hashing for the evidence Merkle tree.
//!
//! ```text
//! leaf = SHA-256(0x00 || canonical_item_bytes)
//! node = SHA-256(0x01 || left || right)
//! ```
//!
//! The one-byte tags keep a leaf from ever being reinterpreted as an
//! internal node (and vice versa), closing the classic second-preimage hole
//! in untagged Merkle trees.

use sha2::{Digest, Sha256};

use crate::types::Hash256;

/// Domain tag prefixed to every leaf preimage.
pub const LEAF_TAG: u8 = 0x00;

/// Domain tag prefixed to every internal node preimage.
pub const NODE_TAG: u8 = 0x01;

/// Plain SHA-256 of `data`.
#[must_use]
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(data).into())
}

/// Hash canonical item bytes into a Merkle leaf.
#[must_use]
pub fn leaf_hash(canonical: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_TAG]);
    hasher.update(canonical);
    Hash256(hasher.finalize().into())
}

/// Combine two child hashes into their parent node.
#[must_use]
pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update([NODE_TAG]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash256(hasher.finalize().into())
}
