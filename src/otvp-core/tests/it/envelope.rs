//! Trust envelope integration tests: scoring, disclosure and tamper checks.

use std::time::Duration;

use otvp_core::{
    build_claim, compose, AgentIdentity, AgentKeyPair, AttestError, Claim, ClaimRequest,
    ClaimResult, ControlDescriptor, DisclosureLevel, EnvelopeRequest, EnvelopeView,
    EvidenceStore, TrustEnvelope, TrustLevel,
};
use proptest::prelude::*;
use serde_json::json;

struct Agent {
    store: EvidenceStore,
    keypair: AgentKeyPair,
    identity: AgentIdentity,
}

impl Agent {
    fn new() -> Self {
        Self {
            store: EvidenceStore::new(),
            keypair: AgentKeyPair::generate().unwrap(),
            identity: AgentIdentity::new("meridian-agent", "2.0.0"),
        }
    }

    fn claim(&self, result: ClaimResult, confidence: f64) -> Claim {
        let item = self
            .store
            .append("identity_and_access.logical_access", json!({ "users": 40 }))
            .unwrap();
        build_claim(
            ClaimRequest::new(
                "identity_and_access.logical_access",
                "SECRET-ASSERTION",
                result,
                confidence,
            )
            .with_evidence(item.evidence_id)
            .with_opinion("SECRET-OPINION")
            .with_caveat("SECRET-CAVEAT")
            .with_recommendation("SECRET-RECOMMENDATION"),
            &self.store,
            &self.identity,
            &self.keypair,
        )
        .unwrap()
    }

    fn envelope(&self, confidences: &[f64], level: DisclosureLevel) -> TrustEnvelope {
        let claims = confidences
            .iter()
            .map(|c| self.claim(ClaimResult::Satisfied, *c))
            .collect();
        compose(
            EnvelopeRequest {
                control: ControlDescriptor::new("LA.03", "User access review"),
                product_id: "P1".into(),
                claims,
                disclosure_level: level,
                ttl: Duration::from_secs(86_400),
                supersedes: None,
            },
            &self.store,
            &self.identity,
            &self.keypair,
        )
        .unwrap()
    }
}

#[test]
fn trust_levels_for_reference_confidences() {
    let agent = Agent::new();
    let cases: &[(&[f64], TrustLevel)] = &[
        (&[0.95, 0.96], TrustLevel::Verified),
        (&[0.80], TrustLevel::High),
        (&[0.60], TrustLevel::Medium),
        (&[0.40], TrustLevel::Low),
        (&[0.10], TrustLevel::Critical),
        (&[0.95], TrustLevel::Verified),
        (&[0.30], TrustLevel::Low),
    ];

    for (confidences, expected) in cases {
        let envelope = agent.envelope(confidences, DisclosureLevel::Full);
        assert_eq!(
            envelope.trust_level(),
            *expected,
            "confidences {confidences:?} gave {}",
            envelope.composite_confidence()
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    /// Trust level is monotonic in confidence.
    #[test]
    fn trust_level_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
        let rank = |level: TrustLevel| match level {
            TrustLevel::Critical => 0,
            TrustLevel::Low => 1,
            TrustLevel::Medium => 2,
            TrustLevel::High => 3,
            TrustLevel::Verified => 4,
        };
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(rank(TrustLevel::from_confidence(lo)) <= rank(TrustLevel::from_confidence(hi)));
    }

    /// Composite confidence is the rounded mean and lies within the claim range.
    #[test]
    fn composite_within_bounds(confidences in prop::collection::vec(0.0f64..=1.0, 1..6)) {
        let agent = Agent::new();
        let envelope = agent.envelope(&confidences, DisclosureLevel::Full);

        let min = confidences.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = confidences.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let composite = envelope.composite_confidence();

        prop_assert!(composite >= (min * 10_000.0).floor() / 10_000.0);
        prop_assert!(composite <= (max * 10_000.0).ceil() / 10_000.0);
        prop_assert_eq!(envelope.trust_level(), TrustLevel::from_confidence(composite));
    }
}

#[test]
fn zero_knowledge_view_leaks_no_claim_text() {
    let agent = Agent::new();
    let envelope = agent.envelope(&[0.9, 0.7], DisclosureLevel::ZeroKnowledge);
    let evidence_ids: Vec<String> = envelope
        .claims()
        .iter()
        .flat_map(|c| c.evidence_refs().iter().map(|id| id.to_string()))
        .collect();

    let verified = envelope.verify(&agent.keypair.public_key()).unwrap();
    let view = verified.view();
    assert_eq!(view.level(), DisclosureLevel::ZeroKnowledge);

    let rendered = serde_json::to_string(&view).unwrap();
    for secret in ["SECRET-ASSERTION", "SECRET-OPINION", "SECRET-CAVEAT", "SECRET-RECOMMENDATION", "evidence_refs"] {
        assert!(!rendered.contains(secret), "zero-knowledge view leaked {secret}");
    }
    for id in &evidence_ids {
        assert!(!rendered.contains(id.as_str()));
    }

    match view {
        EnvelopeView::ZeroKnowledge(zk) => {
            assert_eq!(zk.merkle_root, agent.store.current_root().unwrap());
            assert_eq!(zk.trust_level, envelope.trust_level());
            assert_eq!(zk.domain_scores, *envelope.domain_scores());
        },
        other => panic!("expected zero-knowledge view, got {:?}", other.level()),
    }
}

#[test]
fn full_envelope_can_be_viewed_at_every_level() {
    let agent = Agent::new();
    let envelope = agent.envelope(&[0.9], DisclosureLevel::Full);
    let verified = envelope.verify(&agent.keypair.public_key()).unwrap();

    for level in [
        DisclosureLevel::Full,
        DisclosureLevel::ClaimsOnly,
        DisclosureLevel::ZeroKnowledge,
    ] {
        assert_eq!(verified.view_at(level).unwrap().level(), level);
    }

    match verified.view() {
        EnvelopeView::Full(full) => assert_eq!(&full, &envelope),
        other => panic!("expected full view, got {:?}", other.level()),
    }
}

#[test]
fn zero_knowledge_envelope_cannot_widen() {
    let agent = Agent::new();
    let envelope = agent.envelope(&[0.9], DisclosureLevel::ZeroKnowledge);
    let verified = envelope.verify(&agent.keypair.public_key()).unwrap();

    for level in [DisclosureLevel::Full, DisclosureLevel::ClaimsOnly] {
        let err = verified.view_at(level).unwrap_err();
        assert!(matches!(err, AttestError::DisclosureWidening { .. }));
        assert!(err.is_validation());
    }
}

#[test]
fn tampered_envelope_cannot_be_viewed() {
    let agent = Agent::new();
    let envelope = agent.envelope(&[0.5], DisclosureLevel::Full);

    let mut value = serde_json::to_value(&envelope).unwrap();
    value["composite_confidence"] = json!(0.99);
    value["trust_level"] = json!("VERIFIED");
    let forged: TrustEnvelope = serde_json::from_value(value).unwrap();

    let err = forged.verify(&agent.keypair.public_key()).unwrap_err();
    assert!(err.is_integrity());
}

#[test]
fn tampered_inner_claim_is_detected() {
    let agent = Agent::new();
    let envelope = agent.envelope(&[0.5], DisclosureLevel::Full);

    let mut value = serde_json::to_value(&envelope).unwrap();
    value["claims"][0]["confidence"] = json!(1.0);
    let forged: TrustEnvelope = serde_json::from_value(value).unwrap();

    assert!(forged.verify(&agent.keypair.public_key()).is_err());
}

#[test]
fn claims_from_missing_evidence_rejected_at_composition() {
    let agent = Agent::new();
    let claim = agent.claim(ClaimResult::Satisfied, 0.9);

    // Same key, but a store that never saw the evidence.
    let result = compose(
        EnvelopeRequest {
            control: ControlDescriptor::new("LA.03", "User access review"),
            product_id: "P1".into(),
            claims: vec![claim],
            disclosure_level: DisclosureLevel::Full,
            ttl: Duration::from_secs(60),
            supersedes: None,
        },
        &EvidenceStore::new(),
        &agent.identity,
        &agent.keypair,
    );

    assert!(matches!(result, Err(AttestError::DanglingReference { .. })));
}

#[test]
fn zero_ttl_rejected() {
    let agent = Agent::new();
    let result = compose(
        EnvelopeRequest {
            control: ControlDescriptor::new("LA.03", "User access review"),
            product_id: "P1".into(),
            claims: vec![agent.claim(ClaimResult::Satisfied, 0.9)],
            disclosure_level: DisclosureLevel::Full,
            ttl: Duration::ZERO,
            supersedes: None,
        },
        &agent.store,
        &agent.identity,
        &agent.keypair,
    );
    assert!(matches!(result, Err(AttestError::InvalidTtl { .. })));
}
