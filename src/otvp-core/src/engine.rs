//! Attestation engine.
//!
//! Owns the agent key pair, the evidence store and the agent identity for
//! the lifetime of the process and threads them through every operation:
//!
//! 1. Record evidence (append + signed receipt)
//! 2. Issue claims over recorded evidence
//! 3. Compose trust envelopes from claims
//! 4. Verify envelopes, receipts and proofs
//!
//! The engine performs no network I/O and never retries. Callers supply
//! resolved check output and own their retry policy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use otvp_crypto::Hash256;
use otvp_keyring::{AgentKeyPair, AgentPublicKey, KeyInfo, KeyStore};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::claims::{build_claim, AgentIdentity, Claim, ClaimRequest};
use crate::config::EngineConfig;
use crate::envelope::{
    compose, ControlDescriptor, DisclosureLevel, EnvelopeRequest, TrustEnvelope, VerifiedEnvelope,
};
use crate::error::AttestError;
use crate::evidence::{EvidenceItem, EvidenceStore, MerkleProof, StoreSnapshot};
use crate::receipt::EvidenceReceipt;

/// The attestation engine.
///
/// This is the primary entry point for all attestation operations.
pub struct AttestationEngine {
    /// Configuration.
    config: EngineConfig,
    /// Identity stamped on claims and envelopes.
    identity: AgentIdentity,
    /// Agent signing key, shared read-only.
    keypair: Arc<AgentKeyPair>,
    /// Evidence store.
    store: Arc<EvidenceStore>,
    /// Latest envelope id per (control, product).
    latest_envelopes: Mutex<HashMap<(String, String), Uuid>>,
}

impl AttestationEngine {
    /// Create an engine from configuration.
    ///
    /// Loads the agent key from `key_dir` (generating it on first start) and
    /// opens the evidence log if one is configured.
    pub fn new(config: EngineConfig) -> Result<Self, AttestError> {
        info!(
            agent_id = %config.agent_id,
            key_dir = %config.key_dir.display(),
            "AttestationEngine: loading agent key"
        );
        let keypair = KeyStore::new(&config.key_dir).load_or_generate()?;

        let store = match &config.evidence_log {
            Some(path) => EvidenceStore::open(path)?,
            None => {
                info!("AttestationEngine: no evidence log configured, evidence is memory-only");
                EvidenceStore::new()
            },
        };

        Ok(Self::with_parts(config, Arc::new(keypair), Arc::new(store)))
    }

    /// Create an engine from an existing key pair and store.
    pub fn with_parts(
        config: EngineConfig,
        keypair: Arc<AgentKeyPair>,
        store: Arc<EvidenceStore>,
    ) -> Self {
        let identity = AgentIdentity::new(&config.agent_id, &config.agent_version);

        info!(
            agent_id = %identity.agent_id,
            agent_version = %identity.agent_version,
            key_id = %keypair.key_id(),
            evidence_items = store.len(),
            "AttestationEngine: ready"
        );

        Self {
            config,
            identity,
            keypair,
            store,
            latest_envelopes: Mutex::new(HashMap::new()),
        }
    }

    /// Append evidence and return a signed receipt.
    #[instrument(skip(self, payload))]
    pub fn record_evidence(
        &self,
        domain: &str,
        payload: Value,
    ) -> Result<EvidenceReceipt, AttestError> {
        let (item, root) = self.store.append_with_root(domain, payload)?;
        let receipt = EvidenceReceipt::issue(
            &item,
            root,
            &self.identity.agent_id,
            &self.keypair.key_id(),
            self.keypair.as_ref(),
        )?;

        debug!(evidence_id = %item.evidence_id, index = item.index, "Evidence recorded");
        Ok(receipt)
    }

    /// Check a receipt against this agent's key and the store.
    ///
    /// # Errors
    ///
    /// - [`AttestError::SignatureInvalid`] if the receipt was not signed by
    ///   this agent or was altered
    /// - [`AttestError::EvidenceNotFound`] if the store lacks the item
    /// - [`AttestError::ProofMismatch`] if the stored item disagrees with
    ///   the receipt, or the receipt's root is not the root this store had
    ///   right after the append
    #[instrument(skip(self, receipt), fields(evidence_id = %receipt.evidence_id()))]
    pub fn verify_receipt(&self, receipt: &EvidenceReceipt) -> Result<(), AttestError> {
        if !receipt.verify(&self.keypair.public_key()) {
            warn!("Receipt signature verification failed");
            return Err(AttestError::SignatureInvalid {
                record: "receipt",
                id: receipt.evidence_id().to_string(),
            });
        }

        let item = self.store.get(&receipt.evidence_id())?;
        if item.index != receipt.index() || !item.leaf_hash.ct_eq(&receipt.leaf_hash()) {
            warn!(
                stored_index = item.index,
                receipt_index = receipt.index(),
                "Receipt disagrees with stored evidence"
            );
            return Err(AttestError::ProofMismatch {
                evidence_id: receipt.evidence_id(),
                reason: "stored item does not match receipt".into(),
            });
        }

        let at_append = StoreSnapshot {
            tree_size: receipt.index().saturating_add(1),
            root: receipt.root(),
        };
        let proof = self.store.proof_at(&receipt.evidence_id(), &at_append)?;
        if !EvidenceStore::verify_proof(&proof) {
            return Err(AttestError::ProofMismatch {
                evidence_id: receipt.evidence_id(),
                reason: "receipt root does not include the item".into(),
            });
        }
        Ok(())
    }

    /// Build and sign a claim. A request without a TTL gets the configured
    /// claim TTL.
    #[instrument(skip(self, request), fields(domain = %request.domain, result = %request.result))]
    pub fn issue_claim(&self, mut request: ClaimRequest) -> Result<Claim, AttestError> {
        if request.ttl_seconds.is_none() {
            request.ttl_seconds = Some(self.config.claim_ttl.as_secs());
        }
        build_claim(request, &self.store, &self.identity, self.keypair.as_ref())
    }

    /// Compose and sign an envelope for one control × product.
    ///
    /// The new envelope records the id of the previous envelope composed by
    /// this engine for the same pair in `supersedes`. `None` for
    /// `disclosure` uses the configured default.
    #[instrument(skip(self, control, claims), fields(control_id = %control.control_id, claims = claims.len()))]
    pub fn compose_envelope(
        &self,
        control: ControlDescriptor,
        product_id: &str,
        claims: Vec<Claim>,
        disclosure: Option<DisclosureLevel>,
    ) -> Result<TrustEnvelope, AttestError> {
        let mut latest = self
            .latest_envelopes
            .lock()
            .map_err(|_| AttestError::store_unavailable("envelope index lock poisoned"))?;

        let key = (control.control_id.clone(), product_id.to_string());
        let supersedes = latest.get(&key).copied();

        let envelope = compose(
            EnvelopeRequest {
                control,
                product_id: product_id.to_string(),
                claims,
                disclosure_level: disclosure.unwrap_or(self.config.default_disclosure),
                ttl: self.config.envelope_ttl,
                supersedes,
            },
            &self.store,
            &self.identity,
            self.keypair.as_ref(),
        )?;

        latest.insert(key, envelope.envelope_id());
        Ok(envelope)
    }

    /// Verify an envelope under this agent's key.
    pub fn verify_envelope<'a>(
        &self,
        envelope: &'a TrustEnvelope,
    ) -> Result<VerifiedEnvelope<'a>, AttestError> {
        envelope.verify(&self.keypair.public_key())
    }

    /// Inclusion proof against the current root.
    pub fn proof_for(&self, evidence_id: &Uuid) -> Result<MerkleProof, AttestError> {
        self.store.proof_for(evidence_id)
    }

    /// Inclusion proof against an earlier snapshot.
    pub fn proof_at(
        &self,
        evidence_id: &Uuid,
        snapshot: &StoreSnapshot,
    ) -> Result<MerkleProof, AttestError> {
        self.store.proof_at(evidence_id, snapshot)
    }

    /// Capture the current tree size and root.
    pub fn snapshot(&self) -> Result<Option<StoreSnapshot>, AttestError> {
        self.store.snapshot()
    }

    /// Verify a proof. Pure.
    pub fn verify_proof(proof: &MerkleProof) -> bool {
        EvidenceStore::verify_proof(proof)
    }

    /// Current root. `None` before the first append.
    pub fn current_root(&self) -> Result<Option<Hash256>, AttestError> {
        self.store.current_root()
    }

    /// Look up an evidence item.
    pub fn evidence(&self, evidence_id: &Uuid) -> Result<EvidenceItem, AttestError> {
        self.store.get(evidence_id)
    }

    /// Agent public key.
    pub fn public_key(&self) -> AgentPublicKey {
        self.keypair.public_key()
    }

    /// Public description of the agent key.
    pub fn key_info(&self) -> KeyInfo {
        self.keypair.info()
    }

    /// Agent identity.
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared handle to the evidence store.
    pub fn store(&self) -> &Arc<EvidenceStore> {
        &self.store
    }
}
