//! Append-only Merkle evidence store.
//!
//! Every control evaluation's raw output is appended as an [`EvidenceItem`].
//! The store keeps the Merkle tree as an arena of levels:
//!
//! ```text
//! levels[0]        leaf hashes, one per item, in append order
//! levels[h + 1][i] = H(0x01 || levels[h][2i] || levels[h][2i + 1])
//! ```
//!
//! A lone node at the end of a level is promoted to the next level unchanged.
//! An append touches only the ancestor path of the new leaf.
//!
//! ## Concurrency
//!
//! Appends take the write guard for the whole read-modify-write. Proofs and
//! root reads take the read guard, so they see one consistent tree. Proofs
//! against an older root are produced from a [`StoreSnapshot`].
//!
//! ## Persistence
//!
//! With a log path configured, each item is written to an append-only JSONL
//! file before the in-memory tree changes. [`EvidenceStore::open`] rebuilds
//! the tree from that file and re-derives every leaf hash.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use otvp_crypto::{encode_without_field, leaf_hash, node_hash, Hash256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AttestError;

/// Upper bound on proof length. A tree of `2^64` leaves has 64 levels.
const MAX_PROOF_DEPTH: usize = 64;

/// One immutable evidence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Unique evidence id.
    pub evidence_id: Uuid,
    /// Position in the log (leaf index).
    pub index: u64,
    /// Collection time.
    pub collected_at: DateTime<Utc>,
    /// Hierarchical dotted domain.
    pub domain: String,
    /// Raw check output.
    pub payload: Value,
    /// `H(0x00 || encode(item without leaf_hash))`.
    pub leaf_hash: Hash256,
}

impl EvidenceItem {
    /// Recompute the leaf hash from the item's content.
    pub fn compute_leaf_hash(&self) -> Result<Hash256, AttestError> {
        let canonical = encode_without_field(self, "leaf_hash")?;
        Ok(leaf_hash(&canonical))
    }

    fn new(index: u64, domain: &str, payload: Value) -> Result<Self, AttestError> {
        let mut item = Self {
            evidence_id: Uuid::new_v4(),
            index,
            collected_at: Utc::now(),
            domain: domain.to_string(),
            payload,
            leaf_hash: Hash256::ZERO,
        };
        item.leaf_hash = item.compute_leaf_hash()?;
        Ok(item)
    }
}

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiblingPosition {
    /// `node = H(0x01 || sibling || current)`
    Left,
    /// `node = H(0x01 || current || sibling)`
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Sibling hash at this level.
    pub hash: Hash256,
    /// Side the sibling sits on.
    pub position: SiblingPosition,
}

/// Self-contained Merkle inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Evidence being proved.
    pub evidence_id: Uuid,
    /// Leaf index of the evidence.
    pub leaf_index: u64,
    /// Number of leaves in the tree the proof was taken from.
    pub tree_size: u64,
    /// Leaf hash of the evidence.
    pub leaf_hash: Hash256,
    /// Siblings from the leaf level upward.
    pub siblings: Vec<ProofStep>,
    /// Root the proof resolves to.
    pub root: Hash256,
}

/// Tree size and root captured at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Number of leaves at capture time.
    pub tree_size: u64,
    /// Root at capture time.
    pub root: Hash256,
}

#[derive(Default)]
struct StoreState {
    items: Vec<EvidenceItem>,
    by_id: HashMap<Uuid, usize>,
    levels: Vec<Vec<Hash256>>,
}

impl StoreState {
    fn root(&self) -> Option<Hash256> {
        self.levels.last().and_then(|top| top.first()).copied()
    }

    fn item(&self, evidence_id: &Uuid) -> Result<&EvidenceItem, AttestError> {
        self.by_id
            .get(evidence_id)
            .map(|idx| &self.items[*idx])
            .ok_or(AttestError::EvidenceNotFound {
                evidence_id: *evidence_id,
            })
    }

    fn push(&mut self, item: EvidenceItem) {
        push_leaf(&mut self.levels, item.leaf_hash);
        self.by_id.insert(item.evidence_id, self.items.len());
        self.items.push(item);
    }
}

/// Append-only evidence store with an incrementally maintained Merkle tree.
pub struct EvidenceStore {
    state: RwLock<StoreState>,
    log_path: Option<PathBuf>,
}

impl EvidenceStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            log_path: None,
        }
    }

    /// Open a store backed by a JSONL evidence log.
    ///
    /// A missing file yields an empty store that will create it on first
    /// append. Each line is checked in order: it must parse, carry the next
    /// index, have a unique id, and hash to its recorded leaf hash.
    ///
    /// # Errors
    ///
    /// Returns [`AttestError::EvidenceLogCorrupt`] on the first line failing
    /// a check, or [`AttestError::Persistence`] if the file cannot be read.
    pub fn open(log_path: impl Into<PathBuf>) -> Result<Self, AttestError> {
        let log_path = log_path.into();
        let mut state = StoreState::default();

        match std::fs::File::open(&log_path) {
            Ok(file) => {
                for (offset, line) in BufReader::new(file).lines().enumerate() {
                    let line_no = offset + 1;
                    let line = line.map_err(|e| AttestError::persistence(&log_path, e.to_string()))?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let item = check_log_line(&state, line_no, &line)?;
                    state.push(item);
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {},
            Err(e) => {
                tracing::error!(path = %log_path.display(), error = %e, "EvidenceStore: cannot open log");
                return Err(AttestError::persistence(&log_path, e.to_string()));
            },
        }

        tracing::info!(
            path = %log_path.display(),
            items = state.items.len(),
            root = ?state.root(),
            "EvidenceStore: opened evidence log"
        );

        Ok(Self {
            state: RwLock::new(state),
            log_path: Some(log_path),
        })
    }

    /// Path of the durable log, if any.
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Append a new evidence item.
    ///
    /// The item is persisted before the tree changes; on persistence failure
    /// the store is left untouched.
    pub fn append(&self, domain: &str, payload: Value) -> Result<EvidenceItem, AttestError> {
        self.append_with_root(domain, payload).map(|(item, _)| item)
    }

    /// Append and return the root immediately after this append.
    pub(crate) fn append_with_root(
        &self,
        domain: &str,
        payload: Value,
    ) -> Result<(EvidenceItem, Hash256), AttestError> {
        validate_domain(domain)?;

        let mut state = self.write()?;
        let item = EvidenceItem::new(state.items.len() as u64, domain, payload)?;

        if let Some(path) = &self.log_path {
            append_to_log(path, &item)?;
        }

        state.push(item.clone());
        let root = state
            .root()
            .ok_or_else(|| AttestError::store_unavailable("tree has no root after append"))?;

        tracing::debug!(
            evidence_id = %item.evidence_id,
            index = item.index,
            domain = %item.domain,
            root = %root,
            "EvidenceStore: appended"
        );

        Ok((item, root))
    }

    /// Inclusion proof against the current root.
    pub fn proof_for(&self, evidence_id: &Uuid) -> Result<MerkleProof, AttestError> {
        let state = self.read()?;
        let item = state.item(evidence_id)?;
        let root = state
            .root()
            .ok_or_else(|| AttestError::store_unavailable("tree has no root"))?;

        let proof = MerkleProof {
            evidence_id: *evidence_id,
            leaf_index: item.index,
            tree_size: state.items.len() as u64,
            leaf_hash: item.leaf_hash,
            siblings: proof_path(&state.levels, item.index as usize),
            root,
        };

        tracing::debug!(
            evidence_id = %evidence_id,
            leaf_index = proof.leaf_index,
            tree_size = proof.tree_size,
            "EvidenceStore: proof generated"
        );
        Ok(proof)
    }

    /// Capture the current tree size and root. `None` while the store is
    /// empty.
    pub fn snapshot(&self) -> Result<Option<StoreSnapshot>, AttestError> {
        let state = self.read()?;
        Ok(state.root().map(|root| StoreSnapshot {
            tree_size: state.items.len() as u64,
            root,
        }))
    }

    /// Inclusion proof against a previously captured snapshot.
    ///
    /// # Errors
    ///
    /// - [`AttestError::EvidenceNotFound`] if the item is unknown or was
    ///   appended after the snapshot
    /// - [`AttestError::ProofMismatch`] if the snapshot was not taken from
    ///   this store
    pub fn proof_at(
        &self,
        evidence_id: &Uuid,
        snapshot: &StoreSnapshot,
    ) -> Result<MerkleProof, AttestError> {
        let state = self.read()?;
        let item = state.item(evidence_id)?;

        let size = snapshot.tree_size as usize;
        if item.index >= snapshot.tree_size {
            return Err(AttestError::EvidenceNotFound {
                evidence_id: *evidence_id,
            });
        }
        let leaves = state
            .levels
            .first()
            .filter(|leaves| leaves.len() >= size)
            .map(|leaves| &leaves[..size])
            .ok_or_else(|| AttestError::ProofMismatch {
                evidence_id: *evidence_id,
                reason: format!("snapshot size {size} exceeds store size"),
            })?;

        let levels = build_levels(leaves);
        let root = levels.last().and_then(|top| top.first()).copied();
        if !root.is_some_and(|root| root.ct_eq(&snapshot.root)) {
            return Err(AttestError::ProofMismatch {
                evidence_id: *evidence_id,
                reason: "snapshot root does not match store history".into(),
            });
        }

        Ok(MerkleProof {
            evidence_id: *evidence_id,
            leaf_index: item.index,
            tree_size: snapshot.tree_size,
            leaf_hash: item.leaf_hash,
            siblings: proof_path(&levels, item.index as usize),
            root: snapshot.root,
        })
    }

    /// Recompute the root from a proof and compare it with the proof's root.
    ///
    /// Pure: needs no store access.
    ///
    /// The sibling positions must be exactly those implied by `leaf_index`
    /// and `tree_size`, so a proof cannot be replayed for another position.
    pub fn verify_proof(proof: &MerkleProof) -> bool {
        if proof.leaf_index >= proof.tree_size || proof.siblings.len() > MAX_PROOF_DEPTH {
            return false;
        }

        let expected = expected_positions(proof.leaf_index, proof.tree_size);
        if expected.len() != proof.siblings.len()
            || expected
                .iter()
                .zip(&proof.siblings)
                .any(|(position, step)| *position != step.position)
        {
            tracing::debug!(
                leaf_index = proof.leaf_index,
                tree_size = proof.tree_size,
                "EvidenceStore: proof path does not fit its leaf index"
            );
            return false;
        }

        let computed = proof
            .siblings
            .iter()
            .fold(proof.leaf_hash, |current, step| match step.position {
                SiblingPosition::Left => node_hash(&step.hash, &current),
                SiblingPosition::Right => node_hash(&current, &step.hash),
            });

        computed.ct_eq(&proof.root)
    }

    /// Current root. `None` while the store is empty.
    pub fn current_root(&self) -> Result<Option<Hash256>, AttestError> {
        Ok(self.read()?.root())
    }

    /// Look up an item by id.
    pub fn get(&self, evidence_id: &Uuid) -> Result<EvidenceItem, AttestError> {
        self.read()?.item(evidence_id).cloned()
    }

    /// Whether an item with this id exists.
    pub fn contains(&self, evidence_id: &Uuid) -> Result<bool, AttestError> {
        Ok(self.read()?.by_id.contains_key(evidence_id))
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.items.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items with index in `start..end`, clamped to the store size.
    pub fn items_in_range(&self, start: u64, end: u64) -> Result<Vec<EvidenceItem>, AttestError> {
        let state = self.read()?;
        let end = (end as usize).min(state.items.len());
        let start = (start as usize).min(end);
        Ok(state.items[start..end].to_vec())
    }

    /// Root over `leaves` computed from scratch.
    pub fn rebuild_root(leaves: &[Hash256]) -> Option<Hash256> {
        build_levels(leaves)
            .last()
            .and_then(|top| top.first())
            .copied()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, AttestError> {
        self.state
            .read()
            .map_err(|_| AttestError::store_unavailable("evidence lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, AttestError> {
        self.state
            .write()
            .map_err(|_| AttestError::store_unavailable("evidence lock poisoned"))
    }
}

impl Default for EvidenceStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a hierarchical dotted domain such as
/// `identity_and_access.logical_access.new_access`.
pub fn validate_domain(domain: &str) -> Result<(), AttestError> {
    if domain.is_empty() {
        return Err(AttestError::invalid_domain(domain, "domain is empty"));
    }
    for segment in domain.split('.') {
        if segment.is_empty() {
            return Err(AttestError::invalid_domain(domain, "empty segment"));
        }
        if let Some(c) = segment
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(AttestError::invalid_domain(
                domain,
                format!("invalid character {c:?}"),
            ));
        }
    }
    Ok(())
}

// ========================================================================
// Merkle tree internals
// ========================================================================

/// Push a leaf and recompute its ancestor path.
fn push_leaf(levels: &mut Vec<Vec<Hash256>>, leaf: Hash256) {
    if levels.is_empty() {
        levels.push(Vec::new());
    }
    levels[0].push(leaf);

    let mut height = 0;
    let mut idx = levels[0].len() - 1;

    while levels[height].len() > 1 {
        let parent_idx = idx / 2;
        let left = parent_idx * 2;
        let level = &levels[height];
        let parent = match level.get(left + 1) {
            Some(right) => node_hash(&level[left], right),
            None => level[left],
        };

        if levels.len() == height + 1 {
            levels.push(Vec::new());
        }
        let next = &mut levels[height + 1];
        if parent_idx < next.len() {
            next[parent_idx] = parent;
        } else {
            next.push(parent);
        }

        height += 1;
        idx = parent_idx;
    }
}

/// Build every level over `leaves` from scratch.
fn build_levels(leaves: &[Hash256]) -> Vec<Vec<Hash256>> {
    if leaves.is_empty() {
        return Vec::new();
    }

    let mut levels = vec![leaves.to_vec()];
    while let Some(current) = levels.last().filter(|level| level.len() > 1) {
        let next: Vec<Hash256> = current
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => node_hash(left, right),
                _ => pair[0],
            })
            .collect();
        levels.push(next);
    }
    levels
}

/// Sibling path for the leaf at `index`.
fn proof_path(levels: &[Vec<Hash256>], index: usize) -> Vec<ProofStep> {
    let mut path = Vec::new();
    let mut idx = index;

    for level in levels.iter().take_while(|level| level.len() > 1) {
        let sibling = idx ^ 1;
        if let Some(hash) = level.get(sibling) {
            let position = if sibling < idx {
                SiblingPosition::Left
            } else {
                SiblingPosition::Right
            };
            path.push(ProofStep {
                hash: *hash,
                position,
            });
        }
        // else: lone node, promoted without a sibling
        idx /= 2;
    }

    path
}

/// Sibling positions on the path from leaf `index` in a tree of `size`
/// leaves. Levels where the node is promoted alone contribute nothing.
fn expected_positions(index: u64, size: u64) -> Vec<SiblingPosition> {
    let mut positions = Vec::new();
    let (mut idx, mut width) = (index, size);

    while width > 1 {
        let sibling = idx ^ 1;
        if sibling < width {
            positions.push(if sibling < idx {
                SiblingPosition::Left
            } else {
                SiblingPosition::Right
            });
        }
        idx /= 2;
        width = width / 2 + width % 2;
    }
    positions
}

fn check_log_line(state: &StoreState, line_no: usize, line: &str) -> Result<EvidenceItem, AttestError> {
    let item: EvidenceItem = serde_json::from_str(line)
        .map_err(|e| AttestError::log_corrupt(line_no, format!("unparseable entry: {e}")))?;

    let expected_index = state.items.len() as u64;
    if item.index != expected_index {
        return Err(AttestError::log_corrupt(
            line_no,
            format!("index {} where {expected_index} expected", item.index),
        ));
    }
    if state.by_id.contains_key(&item.evidence_id) {
        return Err(AttestError::log_corrupt(
            line_no,
            format!("duplicate evidence id {}", item.evidence_id),
        ));
    }
    validate_domain(&item.domain)
        .map_err(|e| AttestError::log_corrupt(line_no, e.to_string()))?;

    let recomputed = item
        .compute_leaf_hash()
        .map_err(|e| AttestError::log_corrupt(line_no, e.to_string()))?;
    if !recomputed.ct_eq(&item.leaf_hash) {
        tracing::warn!(
            line = line_no,
            evidence_id = %item.evidence_id,
            "EvidenceStore: leaf hash mismatch in evidence log"
        );
        return Err(AttestError::log_corrupt(
            line_no,
            format!("leaf hash mismatch for {}", item.evidence_id),
        ));
    }

    Ok(item)
}

/// Append an item to the JSONL log and sync it to disk.
fn append_to_log(path: &Path, item: &EvidenceItem) -> Result<(), AttestError> {
    let persist = || -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut line = serde_json::to_vec(item)?;
        line.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        write_line(&mut file, &line, |file, line| {
            file.write_all(line)?;
            file.sync_data()
        })
    };

    persist().map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "EvidenceStore: log append failed");
        AttestError::persistence(path, e.to_string())
    })
}

/// Run `write` and, if it fails, cut the file back to its previous length
/// so a torn line never precedes the next append.
fn write_line<W>(file: &mut File, line: &[u8], write: W) -> io::Result<()>
where
    W: FnOnce(&mut File, &[u8]) -> io::Result<()>,
{
    let committed = file.metadata()?.len();
    let result = write(&mut *file, line);

    if result.is_err() {
        if let Err(e) = file.set_len(committed).and_then(|()| file.sync_data()) {
            tracing::error!(
                error = %e,
                committed,
                "EvidenceStore: cannot roll back partial log line"
            );
        }
    }
    result
}
