//! Request and response types exchanged with callers.
//!
//! These are the JSON shapes of the issue, verify, commit, reveal and key
//! discovery calls. Transport is up to the embedding service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use notary_kernel_core::{
    CommitmentId, CommitmentState, CounterfactualCommitment, CounterfactualReveal, Digest, KeyId,
    PublishedKey, Receipt,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub action_type: String,
    pub actor_id: String,
    pub payload_hash: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// An issued receipt with its lookup hash and public verification URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueResponse {
    pub receipt: Receipt,
    pub receipt_hash: Digest,
    pub verification_url: String,
}

/// Verify a receipt supplied inline, or one held by the notary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerifyRequest {
    /// Untrusted receipt JSON. Kept as a value so malformed input can be
    /// reported rather than rejected.
    Receipt { receipt: serde_json::Value },
    Hash { receipt_hash: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub actor_id: String,
    #[serde(flatten)]
    pub fields: CounterfactualReveal,
    /// Absolute reveal deadline.
    pub deadline: DateTime<Utc>,
}

/// Commit acknowledgement. Never echoes the committed plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub commitment_id: CommitmentId,
    pub commitment_hash: Digest,
    pub created_at: DateTime<Utc>,
    pub reveal_deadline: DateTime<Utc>,
}

impl From<&CounterfactualCommitment> for CommitResponse {
    fn from(c: &CounterfactualCommitment) -> Self {
        Self {
            commitment_id: c.commitment_id,
            commitment_hash: c.commitment_hash,
            created_at: c.created_at,
            reveal_deadline: c.reveal_deadline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealRequest {
    pub commitment_id: CommitmentId,
    #[serde(flatten)]
    pub fields: CounterfactualReveal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentStatusResponse {
    pub commitment_id: CommitmentId,
    pub actor_id: String,
    pub state: CommitmentState,
    pub created_at: DateTime<Utc>,
    pub reveal_deadline: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revealed_receipt_hash: Option<Digest>,
}

impl From<CounterfactualCommitment> for CommitmentStatusResponse {
    fn from(c: CounterfactualCommitment) -> Self {
        Self {
            commitment_id: c.commitment_id,
            actor_id: c.actor_id,
            state: c.state,
            created_at: c.created_at,
            reveal_deadline: c.reveal_deadline,
            revealed_receipt_hash: c.revealed_receipt_hash,
        }
    }
}

/// Key discovery: current and historical keys for offline verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySetResponse {
    pub signer_id: String,
    pub active_key_id: Option<KeyId>,
    pub keys: Vec<PublishedKey>,
}
