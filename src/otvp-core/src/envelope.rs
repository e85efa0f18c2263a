//! Trust envelopes: signed aggregations of claims for one control × product.
//!
//! ```text
//! claims ──compose()──▶ TrustEnvelope (signed, unredacted)
//!                            │
//!                      verify(public_key)
//!                            │
//!                            ▼
//!                      VerifiedEnvelope ──view() / view_at()──▶ EnvelopeView
//! ```
//!
//! The signature always covers the full envelope. Disclosure levels are
//! projections applied after verification; a reduced view is never signed
//! or re-verified.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use otvp_crypto::{sign_record, verify_record, Hash256, RecordSigner};
use otvp_keyring::AgentPublicKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::claims::{AgentIdentity, Claim, ClaimResult};
use crate::error::AttestError;
use crate::evidence::EvidenceStore;

/// Default envelope lifetime (24 hours).
pub const DEFAULT_ENVELOPE_TTL_SECS: u64 = 86_400;

/// Composite trust level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustLevel {
    /// `>= 0.95`
    Verified,
    /// `[0.75, 0.95)`
    High,
    /// `[0.55, 0.75)`
    Medium,
    /// `[0.30, 0.55)`
    Low,
    /// `< 0.30`
    Critical,
}

impl TrustLevel {
    /// Step function over composite confidence. Lower edges are closed.
    /// Anything not comparable (NaN) is `Critical`.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.95 {
            Self::Verified
        } else if confidence >= 0.75 {
            Self::High
        } else if confidence >= 0.55 {
            Self::Medium
        } else if confidence >= 0.30 {
            Self::Low
        } else {
            Self::Critical
        }
    }
}

/// How much of an envelope a consumer may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisclosureLevel {
    /// Every claim field.
    #[default]
    Full,
    /// Claim summaries without evidence references.
    ClaimsOnly,
    /// Scores and root only. No per-claim text.
    ZeroKnowledge,
}

impl DisclosureLevel {
    /// Wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::ClaimsOnly => "CLAIMS_ONLY",
            Self::ZeroKnowledge => "ZERO_KNOWLEDGE",
        }
    }

    /// Higher is narrower.
    const fn rank(self) -> u8 {
        match self {
            Self::Full => 0,
            Self::ClaimsOnly => 1,
            Self::ZeroKnowledge => 2,
        }
    }

    /// Whether a view at `self` reveals no more than `other` permits.
    pub const fn is_at_most(self, other: Self) -> bool {
        self.rank() >= other.rank()
    }
}

impl fmt::Display for DisclosureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisclosureLevel {
    type Err = AttestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FULL" => Ok(Self::Full),
            "CLAIMS_ONLY" => Ok(Self::ClaimsOnly),
            "ZERO_KNOWLEDGE" => Ok(Self::ZeroKnowledge),
            _ => Err(AttestError::UnknownDisclosureLevel {
                value: s.to_string(),
            }),
        }
    }
}

/// Control being attested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlDescriptor {
    /// Control identifier, e.g. `LA.01`.
    pub control_id: String,
    /// Human-readable control name.
    pub control_name: String,
    /// Framework → requirement references (e.g. `SOC2` → `["CC6.1"]`).
    pub framework_mappings: BTreeMap<String, Vec<String>>,
}

impl ControlDescriptor {
    /// Control with no framework mappings.
    pub fn new(control_id: impl Into<String>, control_name: impl Into<String>) -> Self {
        Self {
            control_id: control_id.into(),
            control_name: control_name.into(),
            framework_mappings: BTreeMap::new(),
        }
    }

    /// Map the control to requirements of a framework.
    #[must_use]
    pub fn with_mapping<I, S>(mut self, framework: impl Into<String>, requirements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.framework_mappings
            .entry(framework.into())
            .or_default()
            .extend(requirements.into_iter().map(Into::into));
        self
    }
}

/// Evidence backing an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSummary {
    /// Distinct evidence ids referenced across all claims.
    pub total_items: u64,
    /// Store root at composition time. `None` for an empty store.
    pub merkle_root: Option<Hash256>,
    /// Earliest `collected_at` among referenced evidence.
    pub collection_window_start: Option<DateTime<Utc>>,
    /// Latest `collected_at` among referenced evidence.
    pub collection_window_end: Option<DateTime<Utc>>,
    /// Claim domains.
    pub domains_covered: BTreeSet<String>,
}

/// Score breakdown for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainScore {
    /// Claims with result `SATISFIED`.
    pub satisfied: u32,
    /// Claims other than `NOT_APPLICABLE`.
    pub applicable: u32,
    /// All claims in the domain.
    pub total: u32,
    /// `satisfied / applicable`, 0 when nothing applies.
    pub score: f64,
    /// Mean confidence over applicable claims.
    pub mean_confidence: f64,
}

/// Unsigned envelope content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EnvelopeBody {
    envelope_id: Uuid,
    control_id: String,
    control_name: String,
    product_id: String,
    claims: Vec<Claim>,
    evidence_summary: EvidenceSummary,
    composite_confidence: f64,
    trust_level: TrustLevel,
    domain_scores: BTreeMap<String, DomainScore>,
    disclosure_level: DisclosureLevel,
    framework_mappings: BTreeMap<String, Vec<String>>,
    composed_at: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    supersedes: Option<Uuid>,
    agent_id: String,
    agent_version: String,
    public_key: String,
    key_id: String,
}

/// Signed trust envelope. Read-only after composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustEnvelope {
    #[serde(flatten)]
    body: EnvelopeBody,
    signature: String,
}

/// Input for [`compose`].
#[derive(Debug, Clone)]
pub struct EnvelopeRequest {
    /// Control being attested.
    pub control: ControlDescriptor,
    /// Product being attested.
    pub product_id: String,
    /// Signed claims, moved into the envelope.
    pub claims: Vec<Claim>,
    /// Widest disclosure the envelope permits.
    pub disclosure_level: DisclosureLevel,
    /// Lifetime.
    pub ttl: std::time::Duration,
    /// Envelope this one replaces.
    pub supersedes: Option<Uuid>,
}

/// Compose and sign a trust envelope.
///
/// Every claim is re-checked before scoring: it must verify under the
/// composer's key, appear once, and reference only evidence still in
/// `store`.
///
/// # Errors
///
/// - [`AttestError::EmptyClaimSet`], [`AttestError::DuplicateClaim`],
///   [`AttestError::DanglingReference`], [`AttestError::InvalidTtl`]
/// - [`AttestError::SignatureInvalid`] if a claim fails verification
pub fn compose<S>(
    request: EnvelopeRequest,
    store: &EvidenceStore,
    identity: &AgentIdentity,
    signer: &S,
) -> Result<TrustEnvelope, AttestError>
where
    S: RecordSigner + ?Sized,
{
    let EnvelopeRequest {
        control,
        product_id,
        claims,
        disclosure_level,
        ttl,
        supersedes,
    } = request;

    if claims.is_empty() {
        return Err(AttestError::EmptyClaimSet);
    }
    let ttl = chrono::Duration::from_std(ttl)
        .ok()
        .filter(|ttl| *ttl > chrono::Duration::zero())
        .ok_or_else(|| AttestError::InvalidTtl {
            reason: format!("envelope ttl {ttl:?} must be positive and representable"),
        })?;

    let public_key = AgentPublicKey::from_bytes(&signer.public_key()?)?;

    let mut seen = HashSet::with_capacity(claims.len());
    for claim in &claims {
        if !seen.insert(claim.claim_id()) {
            return Err(AttestError::DuplicateClaim {
                claim_id: claim.claim_id(),
            });
        }
        if !claim.verify(&public_key) {
            return Err(AttestError::SignatureInvalid {
                record: "claim",
                id: claim.claim_id().to_string(),
            });
        }
    }

    let evidence_summary = summarize_evidence(&claims, store)?;
    let composite_confidence = composite_confidence(&claims);
    let trust_level = TrustLevel::from_confidence(composite_confidence);
    let domain_scores = domain_scores(&claims);

    if !claims.iter().any(|c| c.result().is_applicable()) {
        tracing::warn!(
            control_id = %control.control_id,
            product_id = %product_id,
            "No applicable claims: composite confidence forced to 0"
        );
    }

    let composed_at = Utc::now();
    let valid_until = composed_at
        .checked_add_signed(ttl)
        .ok_or_else(|| AttestError::InvalidTtl {
            reason: "envelope ttl overflows the calendar".into(),
        })?;
    let body = EnvelopeBody {
        envelope_id: Uuid::new_v4(),
        control_id: control.control_id,
        control_name: control.control_name,
        product_id,
        claims,
        evidence_summary,
        composite_confidence,
        trust_level,
        domain_scores,
        disclosure_level,
        framework_mappings: control.framework_mappings,
        composed_at,
        valid_until,
        supersedes,
        agent_id: identity.agent_id.clone(),
        agent_version: identity.agent_version.clone(),
        public_key: public_key.to_hex(),
        key_id: public_key.key_id(),
    };

    let signature = sign_record(&body, signer)?;

    tracing::info!(
        envelope_id = %body.envelope_id,
        control_id = %body.control_id,
        product_id = %body.product_id,
        claims = body.claims.len(),
        composite_confidence = body.composite_confidence,
        trust_level = ?body.trust_level,
        "Trust envelope composed"
    );

    Ok(TrustEnvelope { body, signature })
}

/// Uniform mean over applicable claims, rounded to 4 decimal places.
/// 0.0 when no claim applies.
pub fn composite_confidence(claims: &[Claim]) -> f64 {
    let applicable: Vec<f64> = claims
        .iter()
        .filter(|c| c.result().is_applicable())
        .map(Claim::confidence)
        .collect();

    if applicable.is_empty() {
        return 0.0;
    }
    round4(applicable.iter().sum::<f64>() / applicable.len() as f64)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn domain_scores(claims: &[Claim]) -> BTreeMap<String, DomainScore> {
    #[derive(Default)]
    struct Tally {
        satisfied: u32,
        applicable: u32,
        total: u32,
        confidence_sum: f64,
    }

    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
    for claim in claims {
        let tally = tallies.entry(claim.domain().to_string()).or_default();
        tally.total += 1;
        match claim.result() {
            ClaimResult::NotApplicable => {},
            ClaimResult::Satisfied => {
                tally.satisfied += 1;
                tally.applicable += 1;
                tally.confidence_sum += claim.confidence();
            },
            ClaimResult::NotSatisfied | ClaimResult::Partial | ClaimResult::Indeterminate => {
                tally.applicable += 1;
                tally.confidence_sum += claim.confidence();
            },
        }
    }

    tallies
        .into_iter()
        .map(|(domain, t)| {
            let (score, mean_confidence) = if t.applicable == 0 {
                (0.0, 0.0)
            } else {
                let n = f64::from(t.applicable);
                (
                    round4(f64::from(t.satisfied) / n),
                    round4(t.confidence_sum / n),
                )
            };
            let score = DomainScore {
                satisfied: t.satisfied,
                applicable: t.applicable,
                total: t.total,
                score,
                mean_confidence,
            };
            (domain, score)
        })
        .collect()
}

fn summarize_evidence(
    claims: &[Claim],
    store: &EvidenceStore,
) -> Result<EvidenceSummary, AttestError> {
    let refs: BTreeSet<Uuid> = claims
        .iter()
        .flat_map(|c| c.evidence_refs().iter().copied())
        .collect();

    let mut window: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    for evidence_id in &refs {
        let item = store.get(evidence_id).map_err(|e| match e {
            AttestError::EvidenceNotFound { evidence_id } => {
                AttestError::DanglingReference { evidence_id }
            },
            other => other,
        })?;
        let at = item.collected_at;
        window = Some(match window {
            None => (at, at),
            Some((start, end)) => (start.min(at), end.max(at)),
        });
    }

    Ok(EvidenceSummary {
        total_items: refs.len() as u64,
        merkle_root: store.current_root()?,
        collection_window_start: window.map(|(start, _)| start),
        collection_window_end: window.map(|(_, end)| end),
        domains_covered: claims.iter().map(|c| c.domain().to_string()).collect(),
    })
}

impl TrustEnvelope {
    /// Verify the envelope signature and every contained claim under
    /// `public_key`.
    ///
    /// Only a verified envelope can be projected to a disclosure view.
    pub fn verify(&self, public_key: &AgentPublicKey) -> Result<VerifiedEnvelope<'_>, AttestError> {
        if !verify_record(&self.body, &self.signature, &public_key.to_bytes()) {
            tracing::warn!(envelope_id = %self.body.envelope_id, "Envelope signature verification failed");
            return Err(AttestError::SignatureInvalid {
                record: "envelope",
                id: self.body.envelope_id.to_string(),
            });
        }
        if let Some(claim) = self.body.claims.iter().find(|c| !c.verify(public_key)) {
            return Err(AttestError::SignatureInvalid {
                record: "claim",
                id: claim.claim_id().to_string(),
            });
        }
        Ok(VerifiedEnvelope { envelope: self })
    }

    /// Whether the envelope still represents current status at `now`.
    /// An expired envelope is informational only.
    pub fn is_current_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.body.composed_at && now < self.body.valid_until
    }

    /// Envelope id.
    pub fn envelope_id(&self) -> Uuid {
        self.body.envelope_id
    }

    /// Control id.
    pub fn control_id(&self) -> &str {
        &self.body.control_id
    }

    /// Control name.
    pub fn control_name(&self) -> &str {
        &self.body.control_name
    }

    /// Product id.
    pub fn product_id(&self) -> &str {
        &self.body.product_id
    }

    /// Claims, in composition order.
    pub fn claims(&self) -> &[Claim] {
        &self.body.claims
    }

    /// Evidence summary.
    pub fn evidence_summary(&self) -> &EvidenceSummary {
        &self.body.evidence_summary
    }

    /// Composite confidence.
    pub fn composite_confidence(&self) -> f64 {
        self.body.composite_confidence
    }

    /// Trust level.
    pub fn trust_level(&self) -> TrustLevel {
        self.body.trust_level
    }

    /// Per-domain scores.
    pub fn domain_scores(&self) -> &BTreeMap<String, DomainScore> {
        &self.body.domain_scores
    }

    /// Widest permitted disclosure.
    pub fn disclosure_level(&self) -> DisclosureLevel {
        self.body.disclosure_level
    }

    /// Framework mappings of the control.
    pub fn framework_mappings(&self) -> &BTreeMap<String, Vec<String>> {
        &self.body.framework_mappings
    }

    /// Composition time.
    pub fn composed_at(&self) -> DateTime<Utc> {
        self.body.composed_at
    }

    /// End of validity.
    pub fn valid_until(&self) -> DateTime<Utc> {
        self.body.valid_until
    }

    /// Envelope this one replaces.
    pub fn supersedes(&self) -> Option<Uuid> {
        self.body.supersedes
    }

    /// Issuing agent.
    pub fn agent_id(&self) -> &str {
        &self.body.agent_id
    }

    /// Issuing agent version.
    pub fn agent_version(&self) -> &str {
        &self.body.agent_version
    }

    /// Signer public key, hex.
    pub fn public_key(&self) -> &str {
        &self.body.public_key
    }

    /// Signer key id.
    pub fn key_id(&self) -> &str {
        &self.body.key_id
    }

    /// Base64url Ed25519 signature.
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// An envelope whose signatures have been checked.
#[derive(Debug, Clone, Copy)]
pub struct VerifiedEnvelope<'a> {
    envelope: &'a TrustEnvelope,
}

impl<'a> VerifiedEnvelope<'a> {
    /// The underlying envelope.
    pub fn envelope(&self) -> &'a TrustEnvelope {
        self.envelope
    }

    /// Project at the envelope's own disclosure level.
    pub fn view(&self) -> EnvelopeView {
        project(self.envelope, self.envelope.disclosure_level())
    }

    /// Project at `level`, which may only be narrower than the envelope's.
    pub fn view_at(&self, level: DisclosureLevel) -> Result<EnvelopeView, AttestError> {
        let permitted = self.envelope.disclosure_level();
        if !level.is_at_most(permitted) {
            return Err(AttestError::DisclosureWidening {
                from: permitted.to_string(),
                to: level.to_string(),
            });
        }
        Ok(project(self.envelope, level))
    }
}

/// Disclosure-filtered rendering of a verified envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeView {
    /// The whole signed envelope.
    Full(TrustEnvelope),
    /// Claim summaries, no evidence references.
    ClaimsOnly(ClaimsOnlyView),
    /// Scores and root only.
    ZeroKnowledge(ZeroKnowledgeView),
}

impl EnvelopeView {
    /// Level this view was rendered at.
    pub fn level(&self) -> DisclosureLevel {
        match self {
            Self::Full(_) => DisclosureLevel::Full,
            Self::ClaimsOnly(_) => DisclosureLevel::ClaimsOnly,
            Self::ZeroKnowledge(_) => DisclosureLevel::ZeroKnowledge,
        }
    }
}

/// Per-claim summary in a `CLAIMS_ONLY` view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimSummary {
    /// Claim id.
    pub claim_id: Uuid,
    /// Domain.
    pub domain: String,
    /// Assertion text.
    pub assertion: String,
    /// Outcome.
    pub result: ClaimResult,
    /// Confidence.
    pub confidence: f64,
    /// Opinion text.
    pub opinion: String,
    /// Number of referenced evidence items.
    pub evidence_count: usize,
    /// Number of caveats.
    pub caveat_count: usize,
    /// Number of recommendations.
    pub recommendation_count: usize,
}

/// `CLAIMS_ONLY` view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimsOnlyView {
    /// Envelope id.
    pub envelope_id: Uuid,
    /// Control id.
    pub control_id: String,
    /// Control name.
    pub control_name: String,
    /// Product id.
    pub product_id: String,
    /// Claim summaries.
    pub claims: Vec<ClaimSummary>,
    /// Evidence summary.
    pub evidence_summary: EvidenceSummary,
    /// Composite confidence.
    pub composite_confidence: f64,
    /// Trust level.
    pub trust_level: TrustLevel,
    /// Per-domain scores.
    pub domain_scores: BTreeMap<String, DomainScore>,
    /// Framework mappings.
    pub framework_mappings: BTreeMap<String, Vec<String>>,
    /// Composition time.
    pub composed_at: DateTime<Utc>,
    /// End of validity.
    pub valid_until: DateTime<Utc>,
    /// Signer key id.
    pub key_id: String,
}

/// `ZERO_KNOWLEDGE` view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZeroKnowledgeView {
    /// Envelope id.
    pub envelope_id: Uuid,
    /// Control id.
    pub control_id: String,
    /// Product id.
    pub product_id: String,
    /// Trust level.
    pub trust_level: TrustLevel,
    /// Composite confidence.
    pub composite_confidence: f64,
    /// Per-domain scores.
    pub domain_scores: BTreeMap<String, DomainScore>,
    /// Store root at composition time.
    pub merkle_root: Option<Hash256>,
    /// Composition time.
    pub composed_at: DateTime<Utc>,
    /// End of validity.
    pub valid_until: DateTime<Utc>,
    /// Signer key id.
    pub key_id: String,
}

fn project(envelope: &TrustEnvelope, level: DisclosureLevel) -> EnvelopeView {
    let body = &envelope.body;
    match level {
        DisclosureLevel::Full => EnvelopeView::Full(envelope.clone()),
        DisclosureLevel::ClaimsOnly => EnvelopeView::ClaimsOnly(ClaimsOnlyView {
            envelope_id: body.envelope_id,
            control_id: body.control_id.clone(),
            control_name: body.control_name.clone(),
            product_id: body.product_id.clone(),
            claims: body
                .claims
                .iter()
                .map(|c| ClaimSummary {
                    claim_id: c.claim_id(),
                    domain: c.domain().to_string(),
                    assertion: c.assertion().to_string(),
                    result: c.result(),
                    confidence: c.confidence(),
                    opinion: c.opinion().to_string(),
                    evidence_count: c.evidence_refs().len(),
                    caveat_count: c.caveats().len(),
                    recommendation_count: c.recommendations().len(),
                })
                .collect(),
            evidence_summary: body.evidence_summary.clone(),
            composite_confidence: body.composite_confidence,
            trust_level: body.trust_level,
            domain_scores: body.domain_scores.clone(),
            framework_mappings: body.framework_mappings.clone(),
            composed_at: body.composed_at,
            valid_until: body.valid_until,
            key_id: body.key_id.clone(),
        }),
        DisclosureLevel::ZeroKnowledge => EnvelopeView::ZeroKnowledge(ZeroKnowledgeView {
            envelope_id: body.envelope_id,
            control_id: body.control_id.clone(),
            product_id: body.product_id.clone(),
            trust_level: body.trust_level,
            composite_confidence: body.composite_confidence,
            domain_scores: body.domain_scores.clone(),
            merkle_root: body.evidence_summary.merkle_root,
            composed_at: body.composed_at,
            valid_until: body.valid_until,
            key_id: body.key_id.clone(),
        }),
    }
}
