//! Signed, evidence-backed claims.
//!
//! A [`Claim`] is the agent's assertion about one compliance domain. It is
//! built from a [`ClaimRequest`], validated against the evidence store, and
//! signed over the canonical encoding of every field except `signature`.
//! Fields are private: a claim cannot be altered after signing, and a
//! correction is a new claim with a new `claim_id`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use otvp_crypto::{sign_record, verify_record, RecordSigner};
use otvp_keyring::AgentPublicKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AttestError;
use crate::evidence::{validate_domain, EvidenceStore};

/// Default claim lifetime (24 hours).
pub const DEFAULT_CLAIM_TTL_SECS: u64 = 86_400;

/// Outcome of a control evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimResult {
    /// Control fully met.
    Satisfied,
    /// Control not met.
    NotSatisfied,
    /// Control partly met.
    Partial,
    /// Evaluation could not decide.
    Indeterminate,
    /// Control does not apply to this scope.
    NotApplicable,
}

impl ClaimResult {
    /// Every result, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Satisfied,
        Self::NotSatisfied,
        Self::Partial,
        Self::Indeterminate,
        Self::NotApplicable,
    ];

    /// Wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Satisfied => "SATISFIED",
            Self::NotSatisfied => "NOT_SATISFIED",
            Self::Partial => "PARTIAL",
            Self::Indeterminate => "INDETERMINATE",
            Self::NotApplicable => "NOT_APPLICABLE",
        }
    }

    /// Whether the claim counts towards composite and domain scores.
    pub const fn is_applicable(&self) -> bool {
        !matches!(self, Self::NotApplicable)
    }
}

impl fmt::Display for ClaimResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimResult {
    type Err = AttestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|result| result.as_str() == normalized)
            .ok_or_else(|| AttestError::UnknownClaimResult {
                value: s.to_string(),
            })
    }
}

/// Where a claim applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimScope {
    /// Deployment environment, e.g. `production`.
    pub environment: String,
    /// Products covered.
    pub products: BTreeSet<String>,
    /// Systems covered.
    pub systems: BTreeSet<String>,
}

impl ClaimScope {
    /// Scope for one environment with no products or systems yet.
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Self::default()
        }
    }

    /// Add a product.
    #[must_use]
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.products.insert(product.into());
        self
    }

    /// Add a system.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.systems.insert(system.into());
        self
    }
}

/// Identity stamped on every claim and envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Agent name.
    pub agent_id: String,
    /// Agent software version.
    pub agent_version: String,
}

impl AgentIdentity {
    /// Create an identity.
    pub fn new(agent_id: impl Into<String>, agent_version: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_version: agent_version.into(),
        }
    }
}

/// Unvalidated input for [`build_claim`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRequest {
    /// Hierarchical dotted domain.
    pub domain: String,
    /// What is asserted.
    pub assertion: String,
    /// Outcome.
    pub result: ClaimResult,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Evidence backing the claim.
    pub evidence_refs: BTreeSet<Uuid>,
    /// Free-text reasoning.
    pub opinion: String,
    /// Limitations of the evaluation.
    pub caveats: Vec<String>,
    /// Suggested remediation.
    pub recommendations: Vec<String>,
    /// Where the claim applies.
    pub scope: ClaimScope,
    /// Lifetime in seconds. `None` uses [`DEFAULT_CLAIM_TTL_SECS`].
    pub ttl_seconds: Option<u64>,
}

impl ClaimRequest {
    /// Start a request with the required fields.
    pub fn new(
        domain: impl Into<String>,
        assertion: impl Into<String>,
        result: ClaimResult,
        confidence: f64,
    ) -> Self {
        Self {
            domain: domain.into(),
            assertion: assertion.into(),
            result,
            confidence,
            evidence_refs: BTreeSet::new(),
            opinion: String::new(),
            caveats: Vec::new(),
            recommendations: Vec::new(),
            scope: ClaimScope::default(),
            ttl_seconds: None,
        }
    }

    /// Reference an evidence item.
    #[must_use]
    pub fn with_evidence(mut self, evidence_id: Uuid) -> Self {
        self.evidence_refs.insert(evidence_id);
        self
    }

    /// Set the opinion text.
    #[must_use]
    pub fn with_opinion(mut self, opinion: impl Into<String>) -> Self {
        self.opinion = opinion.into();
        self
    }

    /// Append a caveat.
    #[must_use]
    pub fn with_caveat(mut self, caveat: impl Into<String>) -> Self {
        self.caveats.push(caveat.into());
        self
    }

    /// Append a recommendation.
    #[must_use]
    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }

    /// Set the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ClaimScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }
}

/// Signed portion of a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ClaimBody {
    claim_id: Uuid,
    domain: String,
    assertion: String,
    result: ClaimResult,
    confidence: f64,
    evidence_refs: BTreeSet<Uuid>,
    opinion: String,
    caveats: Vec<String>,
    recommendations: Vec<String>,
    scope: ClaimScope,
    valid_from: DateTime<Utc>,
    ttl_seconds: u64,
    agent_id: String,
    agent_version: String,
}

/// A signed claim. Read-only after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(flatten)]
    body: ClaimBody,
    signature: String,
}

impl Claim {
    /// Check the signature against `public_key`. Fails closed.
    pub fn verify(&self, public_key: &AgentPublicKey) -> bool {
        let valid = verify_record(&self.body, &self.signature, &public_key.to_bytes());
        if !valid {
            tracing::warn!(claim_id = %self.body.claim_id, "Claim signature verification failed");
        }
        valid
    }

    /// `valid_from + ttl_seconds`.
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.body.ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| self.body.valid_from.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the claim has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Claim id.
    pub fn claim_id(&self) -> Uuid {
        self.body.claim_id
    }

    /// Domain.
    pub fn domain(&self) -> &str {
        &self.body.domain
    }

    /// Assertion text.
    pub fn assertion(&self) -> &str {
        &self.body.assertion
    }

    /// Outcome.
    pub fn result(&self) -> ClaimResult {
        self.body.result
    }

    /// Confidence.
    pub fn confidence(&self) -> f64 {
        self.body.confidence
    }

    /// Referenced evidence ids.
    pub fn evidence_refs(&self) -> &BTreeSet<Uuid> {
        &self.body.evidence_refs
    }

    /// Opinion text.
    pub fn opinion(&self) -> &str {
        &self.body.opinion
    }

    /// Caveats.
    pub fn caveats(&self) -> &[String] {
        &self.body.caveats
    }

    /// Recommendations.
    pub fn recommendations(&self) -> &[String] {
        &self.body.recommendations
    }

    /// Scope.
    pub fn scope(&self) -> &ClaimScope {
        &self.body.scope
    }

    /// Start of validity.
    pub fn valid_from(&self) -> DateTime<Utc> {
        self.body.valid_from
    }

    /// Lifetime in seconds.
    pub fn ttl_seconds(&self) -> u64 {
        self.body.ttl_seconds
    }

    /// Issuing agent.
    pub fn agent_id(&self) -> &str {
        &self.body.agent_id
    }

    /// Issuing agent version.
    pub fn agent_version(&self) -> &str {
        &self.body.agent_version
    }

    /// Base64url Ed25519 signature.
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// Validate a request and sign the resulting claim.
///
/// Validation runs to completion before anything is signed: domain,
/// confidence, TTL, then every evidence reference against `store`.
///
/// # Errors
///
/// - [`AttestError::InvalidDomain`], [`AttestError::InvalidConfidence`],
///   [`AttestError::InvalidTtl`] for malformed input
/// - [`AttestError::DanglingReference`] for evidence the store does not hold
/// - [`AttestError::Crypto`] if encoding or signing fails
pub fn build_claim<S>(
    request: ClaimRequest,
    store: &EvidenceStore,
    identity: &AgentIdentity,
    signer: &S,
) -> Result<Claim, AttestError>
where
    S: RecordSigner + ?Sized,
{
    validate_domain(&request.domain)?;

    if !request.confidence.is_finite() || !(0.0..=1.0).contains(&request.confidence) {
        return Err(AttestError::InvalidConfidence {
            value: request.confidence,
        });
    }

    let ttl_seconds = request.ttl_seconds.unwrap_or(DEFAULT_CLAIM_TTL_SECS);
    if ttl_seconds == 0 {
        return Err(AttestError::InvalidTtl {
            reason: "claim ttl_seconds must be greater than zero".into(),
        });
    }

    for evidence_id in &request.evidence_refs {
        if !store.contains(evidence_id)? {
            tracing::warn!(evidence_id = %evidence_id, domain = %request.domain, "Claim rejected: dangling evidence reference");
            return Err(AttestError::DanglingReference {
                evidence_id: *evidence_id,
            });
        }
    }

    let body = ClaimBody {
        claim_id: Uuid::new_v4(),
        domain: request.domain,
        assertion: request.assertion,
        result: request.result,
        confidence: request.confidence,
        evidence_refs: request.evidence_refs,
        opinion: request.opinion,
        caveats: request.caveats,
        recommendations: request.recommendations,
        scope: request.scope,
        valid_from: Utc::now(),
        ttl_seconds,
        agent_id: identity.agent_id.clone(),
        agent_version: identity.agent_version.clone(),
    };

    let signature = sign_record(&body, signer)?;

    tracing::debug!(
        claim_id = %body.claim_id,
        domain = %body.domain,
        result = %body.result,
        confidence = body.confidence,
        "Claim issued"
    );

    Ok(Claim { body, signature })
}
