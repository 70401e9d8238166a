//! Store trait: the abstract interface for receipt persistence.
//!
//! This trait allows the kernel to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notary_kernel_core::{
    ChainHead, CommitmentId, CommitmentState, CounterfactualCommitment, Digest, PublishedKey,
    Receipt, ReceiptId,
};

use crate::error::Result;

/// Result of a conditional append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// The receipt was stored and the head advanced.
    Appended,
    /// The head was not the expected one. Nothing was written.
    HeadMoved {
        /// The head at the time of the attempt.
        current: Option<ChainHead>,
    },
}

/// The Store trait: async interface for receipts, chain heads and commitments.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Conditional append**: a receipt is written only if the actor's head is
///   still the one it was linked against. This is the storage half of the
///   single-writer-per-actor discipline.
/// - **Append-only**: chains are never rewritten or deleted.
/// - **Commitment transitions** are compare-and-swap on the current state.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Receipt Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a receipt and advance its actor's head, atomically.
    ///
    /// `expected_head` is the head the receipt was linked against (`None` for
    /// a genesis receipt). If the stored head differs, returns `HeadMoved`.
    async fn append_receipt(
        &self,
        receipt: &Receipt,
        receipt_hash: &Digest,
        expected_head: Option<&ChainHead>,
    ) -> Result<AppendResult>;

    /// Get a receipt by its lookup hash.
    async fn get_receipt(&self, receipt_hash: &Digest) -> Result<Option<Receipt>>;

    /// Get a receipt by its receipt id.
    async fn get_receipt_by_id(&self, id: &ReceiptId) -> Result<Option<Receipt>>;

    /// Get a receipt by its position in an actor's chain.
    async fn get_receipt_by_position(&self, actor_id: &str, seq: u64) -> Result<Option<Receipt>>;

    /// Get a range of receipts from an actor's chain.
    ///
    /// Returns receipts with `start <= seq <= end`, ordered by seq.
    async fn get_receipts_range(&self, actor_id: &str, start: u64, end: u64) -> Result<Vec<Receipt>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Chain Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Current head of an actor's chain, if the actor has one.
    async fn get_chain_head(&self, actor_id: &str) -> Result<Option<ChainHead>>;

    /// All actors with a chain, sorted.
    async fn list_actors(&self) -> Result<Vec<String>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Commitment Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a new commitment.
    async fn insert_commitment(&self, commitment: &CounterfactualCommitment) -> Result<()>;

    async fn get_commitment(&self, id: &CommitmentId) -> Result<Option<CounterfactualCommitment>>;

    /// Move a commitment from `from` to `to` if it is currently in `from`.
    ///
    /// Returns whether the transition happened. `revealed_receipt_hash`
    /// replaces the stored value.
    async fn transition_commitment(
        &self,
        id: &CommitmentId,
        from: CommitmentState,
        to: CommitmentState,
        revealed_receipt_hash: Option<Digest>,
    ) -> Result<bool>;

    /// Mark every Committed commitment whose deadline is before `now` as Expired.
    async fn expire_commitments(&self, now: DateTime<Utc>) -> Result<Vec<CommitmentId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Key Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or update a signer's key records. Never holds secret material.
    async fn save_keys(&self, signer_id: &str, keys: &[PublishedKey]) -> Result<()>;

    /// A signer's key records, oldest first.
    async fn load_keys(&self, signer_id: &str) -> Result<Vec<PublishedKey>>;
}

/// Shared stores: several notaries may write through one backend.
#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn append_receipt(
        &self,
        receipt: &Receipt,
        receipt_hash: &Digest,
        expected_head: Option<&ChainHead>,
    ) -> Result<AppendResult> {
        (**self).append_receipt(receipt, receipt_hash, expected_head).await
    }

    async fn get_receipt(&self, receipt_hash: &Digest) -> Result<Option<Receipt>> {
        (**self).get_receipt(receipt_hash).await
    }

    async fn get_receipt_by_id(&self, id: &ReceiptId) -> Result<Option<Receipt>> {
        (**self).get_receipt_by_id(id).await
    }

    async fn get_receipt_by_position(&self, actor_id: &str, seq: u64) -> Result<Option<Receipt>> {
        (**self).get_receipt_by_position(actor_id, seq).await
    }

    async fn get_receipts_range(&self, actor_id: &str, start: u64, end: u64) -> Result<Vec<Receipt>> {
        (**self).get_receipts_range(actor_id, start, end).await
    }

    async fn get_chain_head(&self, actor_id: &str) -> Result<Option<ChainHead>> {
        (**self).get_chain_head(actor_id).await
    }

    async fn list_actors(&self) -> Result<Vec<String>> {
        (**self).list_actors().await
    }

    async fn insert_commitment(&self, commitment: &CounterfactualCommitment) -> Result<()> {
        (**self).insert_commitment(commitment).await
    }

    async fn get_commitment(&self, id: &CommitmentId) -> Result<Option<CounterfactualCommitment>> {
        (**self).get_commitment(id).await
    }

    async fn transition_commitment(
        &self,
        id: &CommitmentId,
        from: CommitmentState,
        to: CommitmentState,
        revealed_receipt_hash: Option<Digest>,
    ) -> Result<bool> {
        (**self)
            .transition_commitment(id, from, to, revealed_receipt_hash)
            .await
    }

    async fn expire_commitments(&self, now: DateTime<Utc>) -> Result<Vec<CommitmentId>> {
        (**self).expire_commitments(now).await
    }

    async fn save_keys(&self, signer_id: &str, keys: &[PublishedKey]) -> Result<()> {
        (**self).save_keys(signer_id, keys).await
    }

    async fn load_keys(&self, signer_id: &str) -> Result<Vec<PublishedKey>> {
        (**self).load_keys(signer_id).await
    }
}

/// Oldest key first, ties broken by id.
pub(crate) fn sort_keys(keys: &mut [PublishedKey]) {
    keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key_id.cmp(&b.key_id)));
}

/// Check that a receipt actually extends `expected_head`.
///
/// Shared by the backends so both reject the same malformed appends.
pub(crate) fn check_extends(
    receipt: &Receipt,
    expected_head: Option<&ChainHead>,
) -> std::result::Result<(), String> {
    match expected_head {
        None if receipt.chain_sequence != 1 => Err(format!(
            "genesis append must have chain_sequence 1, got {}",
            receipt.chain_sequence
        )),
        Some(head) if head.actor_id != receipt.actor_id => Err(format!(
            "head belongs to {}, receipt to {}",
            head.actor_id, receipt.actor_id
        )),
        Some(head) if receipt.chain_sequence != head.head_sequence + 1 => Err(format!(
            "chain_sequence {} does not extend head {}",
            receipt.chain_sequence, head.head_sequence
        )),
        Some(head) if receipt.previous_receipt_hash != head.head_hash => {
            Err("previous_receipt_hash does not match head".into())
        }
        _ => Ok(()),
    }
}
