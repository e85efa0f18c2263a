//! End-to-end engine tests: key and evidence persistence, the full
//! evidence → claim → envelope flow, and concurrent use.

use std::sync::Arc;
use std::thread;

use otvp_core::{
    AttestationEngine, ClaimRequest, ClaimResult, ClaimScope, ControlDescriptor,
    DisclosureLevel, EngineConfig, EnvelopeView, EvidenceStore, TrustLevel,
};
use serde_json::json;
use tempfile::TempDir;

fn config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        key_dir: dir.path().join("keys"),
        evidence_log: Some(dir.path().join("evidence.jsonl")),
        ..EngineConfig::default()
    }
}

#[test]
fn full_attestation_flow() {
    let dir = TempDir::new().unwrap();
    let engine = AttestationEngine::new(config(&dir)).unwrap();

    let new_access = engine
        .record_evidence(
            "identity_and_access.logical_access.new_access",
            json!({ "tickets": 14, "approved": 14 }),
        )
        .unwrap();
    let terminations = engine
        .record_evidence(
            "identity_and_access.logical_access.terminations",
            json!({ "leavers": 3, "disabled_within_sla": 3 }),
        )
        .unwrap();

    let scope = ClaimScope::new("production").with_product("P1").with_system("okta");
    let claims = vec![
        engine
            .issue_claim(
                ClaimRequest::new(
                    "identity_and_access.logical_access.new_access",
                    "All new access was approved",
                    ClaimResult::Satisfied,
                    1.0,
                )
                .with_evidence(new_access.evidence_id())
                .with_scope(scope.clone()),
            )
            .unwrap(),
        engine
            .issue_claim(
                ClaimRequest::new(
                    "identity_and_access.logical_access.terminations",
                    "Leavers disabled within SLA",
                    ClaimResult::Satisfied,
                    0.96,
                )
                .with_evidence(terminations.evidence_id())
                .with_scope(scope),
            )
            .unwrap(),
    ];

    let control = ControlDescriptor::new("LA.01", "Logical access provisioning")
        .with_mapping("SOC2", ["CC6.1", "CC6.2"])
        .with_mapping("ISO27001", ["A.5.15"]);
    let envelope = engine
        .compose_envelope(control, "P1", claims, None)
        .unwrap();

    assert_eq!(envelope.trust_level(), TrustLevel::Verified);
    assert_eq!(envelope.composite_confidence(), 0.98);
    assert_eq!(envelope.evidence_summary().total_items, 2);
    assert_eq!(envelope.evidence_summary().merkle_root, engine.current_root().unwrap());
    assert_eq!(envelope.key_id(), engine.key_info().key_id);

    let verified = engine.verify_envelope(&envelope).unwrap();
    assert!(matches!(verified.view(), EnvelopeView::Full(_)));

    for receipt in [&new_access, &terminations] {
        engine.verify_receipt(receipt).unwrap();
        let proof = engine.proof_for(&receipt.evidence_id()).unwrap();
        assert!(AttestationEngine::verify_proof(&proof));
    }
}

#[test]
fn restart_keeps_key_and_root() {
    let dir = TempDir::new().unwrap();

    let (public_key, root, receipt) = {
        let engine = AttestationEngine::new(config(&dir)).unwrap();
        let mut last = None;
        for i in 0..7 {
            last = Some(engine.record_evidence("access.review", json!({ "run": i })).unwrap());
        }
        (engine.public_key(), engine.current_root().unwrap(), last.unwrap())
    };

    let engine = AttestationEngine::new(config(&dir)).unwrap();
    assert_eq!(engine.public_key(), public_key);
    assert_eq!(engine.current_root().unwrap(), root);
    assert_eq!(engine.store().len(), 7);
    engine.verify_receipt(&receipt).unwrap();

    let next = engine.record_evidence("access.review", json!({ "run": 7 })).unwrap();
    assert_eq!(next.index(), 7);
}

#[cfg(unix)]
#[test]
fn private_key_written_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    AttestationEngine::new(config(&dir)).unwrap();

    let path = dir.path().join("keys").join(otvp_keyring::PRIVATE_KEY_FILE);
    let mode = std::fs::metadata(path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn tampered_evidence_log_refuses_to_start() {
    let dir = TempDir::new().unwrap();
    {
        let engine = AttestationEngine::new(config(&dir)).unwrap();
        engine.record_evidence("access.review", json!({ "passed": false })).unwrap();
    }

    let log = dir.path().join("evidence.jsonl");
    let contents = std::fs::read_to_string(&log).unwrap();
    std::fs::write(&log, contents.replace("false", "true")).unwrap();

    let err = AttestationEngine::new(config(&dir)).err().unwrap();
    assert!(err.is_integrity());
}

#[test]
fn snapshot_proofs_through_engine() {
    let engine = AttestationEngine::with_parts(
        EngineConfig::default(),
        Arc::new(otvp_core::AgentKeyPair::generate().unwrap()),
        Arc::new(EvidenceStore::new()),
    );
    assert_eq!(engine.snapshot().unwrap(), None);

    let receipt = engine.record_evidence("a.b", json!(1)).unwrap();
    let snapshot = engine.snapshot().unwrap().unwrap();
    assert_eq!(snapshot.root, receipt.root());

    engine.record_evidence("a.b", json!(2)).unwrap();
    let proof = engine.proof_at(&receipt.evidence_id(), &snapshot).unwrap();
    assert!(AttestationEngine::verify_proof(&proof));
    assert_eq!(engine.evidence(&receipt.evidence_id()).unwrap().index, 0);
}

#[test]
fn concurrent_appends_and_proofs_stay_consistent() {
    let engine = Arc::new(AttestationEngine::with_parts(
        EngineConfig::default(),
        Arc::new(otvp_core::AgentKeyPair::generate().unwrap()),
        Arc::new(EvidenceStore::new()),
    ));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                (0..25)
                    .map(|i| {
                        let receipt = engine
                            .record_evidence("access.review", json!({ "writer": w, "i": i }))
                            .unwrap();
                        let proof = engine.proof_for(&receipt.evidence_id()).unwrap();
                        assert!(AttestationEngine::verify_proof(&proof));
                        receipt
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let receipts: Vec<_> = writers
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();

    let store = engine.store();
    assert_eq!(store.len(), 100);

    let mut indexes: Vec<u64> = receipts.iter().map(|r| r.index()).collect();
    indexes.sort_unstable();
    assert_eq!(indexes, (0..100).collect::<Vec<_>>());

    let leaves: Vec<_> = store
        .items_in_range(0, 100)
        .unwrap()
        .into_iter()
        .map(|item| item.leaf_hash)
        .collect();
    assert_eq!(store.current_root().unwrap(), EvidenceStore::rebuild_root(&leaves));

    for receipt in &receipts {
        engine.verify_receipt(receipt).unwrap();
    }
}

#[test]
fn configured_disclosure_applies_by_default() {
    let engine = AttestationEngine::with_parts(
        EngineConfig {
            default_disclosure: DisclosureLevel::ClaimsOnly,
            ..EngineConfig::default()
        },
        Arc::new(otvp_core::AgentKeyPair::generate().unwrap()),
        Arc::new(EvidenceStore::new()),
    );
    let claim = engine
        .issue_claim(ClaimRequest::new("a.b", "x", ClaimResult::Satisfied, 0.6))
        .unwrap();

    let envelope = engine
        .compose_envelope(ControlDescriptor::new("LA.04", "Admin access"), "P2", vec![claim], None)
        .unwrap();
    assert_eq!(envelope.disclosure_level(), DisclosureLevel::ClaimsOnly);
    assert_eq!(envelope.trust_level(), TrustLevel::Medium);

    let view = engine.verify_envelope(&envelope).unwrap().view();
    assert!(matches!(view, EnvelopeView::ClaimsOnly(_)));
}

#[test]
fn tampered_receipt_rejected() {
    let engine = AttestationEngine::with_parts(
        EngineConfig::default(),
        Arc::new(otvp_core::AgentKeyPair::generate().unwrap()),
        Arc::new(EvidenceStore::new()),
    );
    engine.record_evidence("a.b", json!(1)).unwrap();
    let receipt = engine.record_evidence("a.b", json!(2)).unwrap();
    engine.verify_receipt(&receipt).unwrap();

    let mut value = serde_json::to_value(&receipt).unwrap();
    value["index"] = json!(0);
    let forged: otvp_core::EvidenceReceipt = serde_json::from_value(value).unwrap();

    let err = engine.verify_receipt(&forged).unwrap_err();
    assert!(err.is_integrity());

    let stranger = otvp_core::AgentKeyPair::generate().unwrap();
    assert!(!receipt.verify(&stranger.public_key()));
}
