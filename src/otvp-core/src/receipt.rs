//! Signed acknowledgement of an evidence append.

use chrono::{DateTime, Utc};
use otvp_crypto::{sign_record, verify_record, Hash256, RecordSigner};
use otvp_keyring::AgentPublicKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AttestError;
use crate::evidence::EvidenceItem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ReceiptBody {
    evidence_id: Uuid,
    index: u64,
    leaf_hash: Hash256,
    root: Hash256,
    issued_at: DateTime<Utc>,
    agent_id: String,
    key_id: String,
}

/// Proof that the agent appended an item and what the root became.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceReceipt {
    #[serde(flatten)]
    body: ReceiptBody,
    signature: String,
}

impl EvidenceReceipt {
    pub(crate) fn issue<S>(
        item: &EvidenceItem,
        root: Hash256,
        agent_id: &str,
        key_id: &str,
        signer: &S,
    ) -> Result<Self, AttestError>
    where
        S: RecordSigner + ?Sized,
    {
        let body = ReceiptBody {
            evidence_id: item.evidence_id,
            index: item.index,
            leaf_hash: item.leaf_hash,
            root,
            issued_at: Utc::now(),
            agent_id: agent_id.to_string(),
            key_id: key_id.to_string(),
        };
        let signature = sign_record(&body, signer)?;
        Ok(Self { body, signature })
    }

    /// Check the signature. Fails closed.
    pub fn verify(&self, public_key: &AgentPublicKey) -> bool {
        verify_record(&self.body, &self.signature, &public_key.to_bytes())
    }

    /// Evidence id.
    pub fn evidence_id(&self) -> Uuid {
        self.body.evidence_id
    }

    /// Leaf index.
    pub fn index(&self) -> u64 {
        self.body.index
    }

    /// Leaf hash.
    pub fn leaf_hash(&self) -> Hash256 {
        self.body.leaf_hash
    }

    /// Root immediately after the append.
    pub fn root(&self) -> Hash256 {
        self.body.root
    }

    /// Issue time.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.body.issued_at
    }

    /// Issuing agent.
    pub fn agent_id(&self) -> &str {
        &self.body.agent_id
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
