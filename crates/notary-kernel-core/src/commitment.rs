//! Commit-reveal binding for counterfactual receipts.
//!
//! A commitment fixes the digest of a decision before its outcome is known.
//! The later reveal must supply the exact pre-image before the deadline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::encode_text_array;
use crate::crypto::Digest;
use crate::types::CommitmentId;

/// Domain tag for commitment digests.
pub const COMMITMENT_DOMAIN: &[u8] = b"notary/commitment/v1";

/// Action type of receipts issued by a successful reveal.
pub const COUNTERFACTUAL_ACTION: &str = "counterfactual";

/// The committed decision and its supporting proofs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterfactualReveal {
    pub decision: String,
    pub reason: String,
    pub capability_proof: String,
    pub opportunity_proof: String,
    pub decision_proof: String,
}

impl CounterfactualReveal {
    /// Digest over the five fields, each length-prefixed.
    pub fn commitment_hash(&self) -> Digest {
        let bytes = encode_text_array(&[
            self.decision.as_str(),
            self.reason.as_str(),
            self.capability_proof.as_str(),
            self.opportunity_proof.as_str(),
            self.decision_proof.as_str(),
        ]);
        Digest::hash_domain(COMMITMENT_DOMAIN, &[bytes.as_slice()])
    }
}

/// Commitment lifecycle. Revealed and Expired are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentState {
    Committed,
    Revealed,
    Expired,
}

impl CommitmentState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Revealed => "revealed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "committed" => Some(Self::Committed),
            "revealed" => Some(Self::Revealed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Committed)
    }
}

/// A stored commitment. Holds only the digest, never the plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterfactualCommitment {
    pub commitment_id: CommitmentId,
    pub actor_id: String,
    pub commitment_hash: Digest,
    pub created_at: DateTime<Utc>,
    pub reveal_deadline: DateTime<Utc>,
    pub state: CommitmentState,
    pub revealed_receipt_hash: Option<Digest>,
}

/// Why a reveal was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealRejection {
    /// Already revealed or expired, or the deadline has passed.
    Expired,
    /// The supplied fields do not hash to the commitment.
    Mismatch,
}

impl CounterfactualCommitment {
    /// Whether the deadline has passed at `now`.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.reveal_deadline
    }

    /// Validate a reveal attempt.
    ///
    /// The deadline and state are checked before the digest, so a correct
    /// pre-image presented late is still refused.
    pub fn check_reveal(
        &self,
        reveal: &CounterfactualReveal,
        now: DateTime<Utc>,
    ) -> Result<(), RevealRejection> {
        if self.state.is_terminal() || self.is_past_deadline(now) {
            return Err(RevealRejection::Expired);
        }
        if reveal.commitment_hash() != self.commitment_hash {
            return Err(RevealRejection::Mismatch);
        }
        Ok(())
    }
}
