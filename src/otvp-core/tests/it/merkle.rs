//! Property-based tests for the Merkle evidence store.

use otvp_core::{EvidenceStore, Hash256, SiblingPosition};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for small JSON payloads.
fn payload() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(|b| json!({ "passed": b })),
        any::<u32>().prop_map(|n| json!({ "count": n })),
        "[a-z ]{0,32}".prop_map(|s| json!({ "note": s })),
        (0.0f64..=1.0).prop_map(|f| json!({ "ratio": f })),
    ]
}

/// Strategy for domains.
fn domain() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z_]{1,8}", 1..4).prop_map(|segments| segments.join("."))
}

fn append_all(store: &EvidenceStore, entries: &[(String, Value)]) -> Vec<uuid::Uuid> {
    entries
        .iter()
        .map(|(d, p)| store.append(d, p.clone()).unwrap().evidence_id)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    /// Every item's proof verifies against the current root.
    #[test]
    fn every_proof_verifies(entries in prop::collection::vec((domain(), payload()), 1..40)) {
        let store = EvidenceStore::new();
        let ids = append_all(&store, &entries);
        let root = store.current_root().unwrap().unwrap();

        for id in &ids {
            let proof = store.proof_for(id).unwrap();
            prop_assert_eq!(proof.root, root);
            prop_assert_eq!(proof.tree_size, ids.len() as u64);
            prop_assert!(EvidenceStore::verify_proof(&proof));
        }
    }

    /// The incrementally maintained root equals a from-scratch rebuild.
    #[test]
    fn incremental_root_matches_rebuild(entries in prop::collection::vec((domain(), payload()), 1..64)) {
        let store = EvidenceStore::new();
        let mut leaves: Vec<Hash256> = Vec::new();

        for (d, p) in &entries {
            leaves.push(store.append(d, p.clone()).unwrap().leaf_hash);
            prop_assert_eq!(store.current_root().unwrap(), EvidenceStore::rebuild_root(&leaves));
        }
    }

    /// Proofs taken at a snapshot stay valid after the store grows.
    #[test]
    fn snapshot_proofs_survive_growth(
        before in prop::collection::vec((domain(), payload()), 1..20),
        after in prop::collection::vec((domain(), payload()), 1..20),
    ) {
        let store = EvidenceStore::new();
        let ids = append_all(&store, &before);
        let snapshot = store.snapshot().unwrap().unwrap();
        append_all(&store, &after);

        for id in &ids {
            let proof = store.proof_at(id, &snapshot).unwrap();
            prop_assert_eq!(proof.root, snapshot.root);
            prop_assert!(EvidenceStore::verify_proof(&proof));
        }
    }

    /// Replacing any sibling hash breaks the proof.
    #[test]
    fn tampered_sibling_fails(
        entries in prop::collection::vec((domain(), payload()), 2..32),
        pick in any::<prop::sample::Index>(),
        step in any::<prop::sample::Index>(),
        byte in 0usize..32,
    ) {
        let store = EvidenceStore::new();
        let ids = append_all(&store, &entries);
        let mut proof = store.proof_for(&ids[pick.index(ids.len())]).unwrap();
        prop_assume!(!proof.siblings.is_empty());

        let i = step.index(proof.siblings.len());
        let mut bytes = *proof.siblings[i].hash.as_bytes();
        bytes[byte] ^= 0x01;
        proof.siblings[i].hash = Hash256::from(bytes);

        prop_assert!(!EvidenceStore::verify_proof(&proof));
    }

    /// A proof for one leaf never verifies with another leaf's hash.
    #[test]
    fn proof_bound_to_leaf(entries in prop::collection::vec((domain(), payload()), 2..32)) {
        let store = EvidenceStore::new();
        let ids = append_all(&store, &entries);

        let mut proof = store.proof_for(&ids[0]).unwrap();
        proof.leaf_hash = store.get(&ids[1]).unwrap().leaf_hash;
        prop_assert!(!EvidenceStore::verify_proof(&proof));
    }
}

#[test]
fn odd_leaf_counts_produce_valid_proofs() {
    for n in [1usize, 3, 5, 7, 9] {
        let store = EvidenceStore::new();
        let ids: Vec<_> = (0..n)
            .map(|i| store.append("access.review", json!({ "i": i })).unwrap().evidence_id)
            .collect();

        for id in &ids {
            let proof = store.proof_for(id).unwrap();
            assert!(EvidenceStore::verify_proof(&proof), "leaf {id} of {n}");
        }
    }
}

#[test]
fn five_leaf_last_proof_is_single_left_sibling() {
    // Leaf 4 of 5 is promoted twice, then paired with the root of leaves 0..4.
    let store = EvidenceStore::new();
    let items: Vec<_> = (0..5)
        .map(|i| store.append("access.review", json!({ "i": i })).unwrap())
        .collect();

    let proof = store.proof_for(&items[4].evidence_id).unwrap();
    assert_eq!(proof.siblings.len(), 1);
    assert_eq!(proof.siblings[0].position, SiblingPosition::Left);

    let leaves: Vec<Hash256> = items[..4].iter().map(|i| i.leaf_hash).collect();
    assert_eq!(Some(proof.siblings[0].hash), EvidenceStore::rebuild_root(&leaves));
}

#[test]
fn proofs_serialize_self_contained() {
    let store = EvidenceStore::new();
    let items: Vec<_> = (0..3)
        .map(|i| store.append("a.b", json!(i)).unwrap())
        .collect();

    let proof = store.proof_for(&items[1].evidence_id).unwrap();
    let json = serde_json::to_string(&proof).unwrap();
    assert!(json.contains("\"position\":\"LEFT\""));

    let restored: otvp_core::MerkleProof = serde_json::from_str(&json).unwrap();
    assert!(EvidenceStore::verify_proof(&restored));
}
