//! Chain: the append-only, hash-linked sequence of one actor's receipts.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::Digest;
use crate::receipt::Receipt;

/// Current tip of an actor's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub actor_id: String,

    /// Sequence of the newest stored receipt.
    pub head_sequence: u64,

    /// Lookup hash of the newest stored receipt.
    pub head_hash: Digest,
}

impl ChainHead {
    /// The head after appending a receipt with the given hash.
    pub fn advance(&self, receipt_hash: Digest) -> Self {
        Self {
            actor_id: self.actor_id.clone(),
            head_sequence: self.head_sequence + 1,
            head_hash: receipt_hash,
        }
    }
}

/// Linkage data stamped onto a new receipt.
///
/// Carries the head it was derived from, so the append can be made
/// conditional on that head still being current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub chain_sequence: u64,
    pub previous_receipt_hash: Digest,
    pub expected_head: Option<ChainHead>,
}

impl ChainLink {
    /// First link of a chain: sequence 1 and the genesis sentinel.
    pub fn genesis() -> Self {
        Self {
            chain_sequence: 1,
            previous_receipt_hash: Digest::ZERO,
            expected_head: None,
        }
    }

    /// The link following the given head, or genesis if there is none.
    pub fn next(head: Option<ChainHead>) -> Self {
        match head {
            None => Self::genesis(),
            Some(head) => Self {
                chain_sequence: head.head_sequence + 1,
                previous_receipt_hash: head.head_hash,
                expected_head: Some(head),
            },
        }
    }
}

/// Why a receipt does not follow its claimed predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainBreak {
    ActorMismatch { expected: String, got: String },
    SequenceGap { expected: u64, got: u64 },
    HashMismatch,
    /// The predecessor itself cannot be hashed (malformed or unknown version).
    UnhashablePrior,
    TimestampRegression,
}

impl fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActorMismatch { expected, got } => {
                write!(f, "prior receipt belongs to actor {expected}, not {got}")
            }
            Self::SequenceGap { expected, got } => {
                write!(f, "chain_sequence {got} does not follow prior (expected {expected})")
            }
            Self::HashMismatch => {
                f.write_str("previous_receipt_hash does not match the prior receipt")
            }
            Self::UnhashablePrior => f.write_str("prior receipt cannot be hashed"),
            Self::TimestampRegression => f.write_str("timestamp is earlier than the prior receipt"),
        }
    }
}

/// Check every link rule between a receipt and its predecessor.
///
/// All breaks are collected; an empty vector means the link holds.
pub fn check_link(receipt: &Receipt, prior: &Receipt) -> Vec<ChainBreak> {
    let mut breaks = Vec::new();

    if receipt.actor_id != prior.actor_id {
        breaks.push(ChainBreak::ActorMismatch {
            expected: prior.actor_id.clone(),
            got: receipt.actor_id.clone(),
        });
    }

    let expected = prior.chain_sequence.saturating_add(1);
    if receipt.chain_sequence != expected {
        breaks.push(ChainBreak::SequenceGap {
            expected,
            got: receipt.chain_sequence,
        });
    }

    match prior.receipt_hash() {
        Ok(hash) if hash == receipt.previous_receipt_hash => {}
        Ok(_) => breaks.push(ChainBreak::HashMismatch),
        Err(_) => breaks.push(ChainBreak::UnhashablePrior),
    }

    // Unparseable timestamps are reported by the structure check instead.
    if let (Some(at), Some(prior_at)) = (receipt.issued_at(), prior.issued_at()) {
        if at < prior_at {
            breaks.push(ChainBreak::TimestampRegression);
        }
    }

    breaks
}

/// Outcome of auditing a stored chain from genesis to head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub actor_id: String,
    pub head_sequence: u64,

    /// Number of receipts that verified fully, counted from genesis.
    pub verified: u64,

    /// First sequence that failed verification or was missing.
    pub first_broken: Option<u64>,

    pub failures: Vec<String>,
}

impl ChainReport {
    /// Whether every receipt up to the head verified.
    pub fn is_intact(&self) -> bool {
        self.first_broken.is_none() && self.verified == self.head_sequence
    }
}
