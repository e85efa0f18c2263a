//! Claims layer integration tests.

use otvp_core::{
    build_claim, AgentIdentity, AgentKeyPair, AttestError, Claim, ClaimRequest, ClaimResult,
    EvidenceStore,
};
use otvp_crypto::encode_without_field;
use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

fn identity() -> AgentIdentity {
    AgentIdentity::new("meridian-agent", "2.0.0")
}

fn result_strategy() -> impl Strategy<Value = ClaimResult> {
    prop::sample::select(ClaimResult::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    /// Any in-range confidence with resolvable evidence yields a verifiable claim.
    #[test]
    fn valid_requests_sign(
        confidence in 0.0f64..=1.0,
        result in result_strategy(),
        refs in 0usize..4,
    ) {
        let store = EvidenceStore::new();
        let keypair = AgentKeyPair::generate().unwrap();

        let mut request = ClaimRequest::new("access.review", "reviewed", result, confidence);
        for i in 0..refs {
            request = request.with_evidence(store.append("access.review", json!(i)).unwrap().evidence_id);
        }

        let claim = build_claim(request, &store, &identity(), &keypair).unwrap();
        prop_assert!(claim.verify(&keypair.public_key()));
        prop_assert_eq!(claim.evidence_refs().len(), refs);
        prop_assert_eq!(claim.result(), result);
    }

    /// Out-of-range confidence never produces a claim.
    #[test]
    fn out_of_range_confidence_rejected(
        confidence in prop_oneof![-1.0e6f64..-1.0e-9, 1.000_000_1f64..1.0e6]
    ) {
        let store = EvidenceStore::new();
        let keypair = AgentKeyPair::generate().unwrap();
        let request = ClaimRequest::new("a.b", "x", ClaimResult::Satisfied, confidence);

        let rejected = matches!(
            build_claim(request, &store, &identity(), &keypair),
            Err(AttestError::InvalidConfidence { .. })
        );
        prop_assert!(rejected);
    }

    /// Unknown result strings are rejected; known ones parse in any case.
    #[test]
    fn result_parsing(s in "[A-Za-z_]{1,16}") {
        let known = ClaimResult::ALL
            .iter()
            .any(|r| r.as_str().eq_ignore_ascii_case(&s));
        match s.parse::<ClaimResult>() {
            Ok(r) => prop_assert!(known && r.as_str().eq_ignore_ascii_case(&s)),
            Err(AttestError::UnknownClaimResult { value }) => {
                prop_assert!(!known);
                prop_assert_eq!(value, s);
            },
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }
}

#[test]
fn dangling_reference_rejected_before_signing() {
    let store = EvidenceStore::new();
    let keypair = AgentKeyPair::generate().unwrap();
    let real = store.append("a.b", json!({})).unwrap();
    let missing = Uuid::new_v4();

    let err = build_claim(
        ClaimRequest::new("a.b", "x", ClaimResult::Satisfied, 0.9)
            .with_evidence(real.evidence_id)
            .with_evidence(missing),
        &store,
        &identity(),
        &keypair,
    )
    .unwrap_err();

    match err {
        AttestError::DanglingReference { evidence_id } => assert_eq!(evidence_id, missing),
        other => panic!("expected dangling reference, got {other}"),
    }
}

#[test]
fn every_field_is_covered_by_the_signature() {
    let store = EvidenceStore::new();
    let keypair = AgentKeyPair::generate().unwrap();
    let item = store.append("a.b", json!({})).unwrap();
    let claim = build_claim(
        ClaimRequest::new("a.b", "assert", ClaimResult::Partial, 0.5)
            .with_evidence(item.evidence_id)
            .with_opinion("opinion")
            .with_caveat("caveat")
            .with_recommendation("recommendation"),
        &store,
        &identity(),
        &keypair,
    )
    .unwrap();

    let value = serde_json::to_value(&claim).unwrap();
    let fields: Vec<String> = value
        .as_object()
        .unwrap()
        .keys()
        .filter(|k| k.as_str() != "signature")
        .cloned()
        .collect();
    assert_eq!(fields.len(), 14);

    for field in fields {
        let mut tampered = value.clone();
        tampered[&field] = json!("tampered");
        if let Ok(tampered) = serde_json::from_value::<Claim>(tampered) {
            assert!(
                !tampered.verify(&keypair.public_key()),
                "changing {field} must invalidate the signature"
            );
        }
    }
}

#[test]
fn signature_preimage_excludes_only_signature() {
    let store = EvidenceStore::new();
    let keypair = AgentKeyPair::generate().unwrap();
    let claim = build_claim(
        ClaimRequest::new("a.b", "x", ClaimResult::Satisfied, 1.0),
        &store,
        &identity(),
        &keypair,
    )
    .unwrap();

    let preimage = encode_without_field(&claim, "signature").unwrap();
    let text = String::from_utf8(preimage).unwrap();
    assert!(text.starts_with("{\"agent_id\":\"meridian-agent\""));
    assert!(!text.contains("\"signature\""));
}
