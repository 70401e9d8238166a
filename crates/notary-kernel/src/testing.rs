//! A memory store with switchable failures, for exercising error paths.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notary_kernel_core::{
    ChainHead, CommitmentId, CommitmentState, CounterfactualCommitment, Digest, PublishedKey,
    Receipt, ReceiptId,
};
use notary_kernel_store::{AppendResult, MemoryStore, Result, Store, StoreError};

/// Delegates to a [`MemoryStore`] unless told to misbehave.
#[derive(Default)]
pub struct StallingStore {
    pub inner: MemoryStore,
    stall_appends: AtomicBool,
    fail_settling: AtomicBool,
    pub append_attempts: AtomicU32,
}

impl StallingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every append reports that the head moved.
    pub fn stall_appends(&self, on: bool) {
        self.stall_appends.store(on, Ordering::SeqCst);
    }

    /// Transitions out of `Revealed` fail with a store error.
    pub fn fail_settling(&self, on: bool) {
        self.fail_settling.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for StallingStore {
    async fn append_receipt(
        &self,
        receipt: &Receipt,
        receipt_hash: &Digest,
        expected_head: Option<&ChainHead>,
    ) -> Result<AppendResult> {
        self.append_attempts.fetch_add(1, Ordering::SeqCst);
        if self.stall_appends.load(Ordering::SeqCst) {
            return Ok(AppendResult::HeadMoved {
                current: expected_head.cloned(),
            });
        }
        self.inner.append_receipt(receipt, receipt_hash, expected_head).await
    }

    async fn get_receipt(&self, receipt_hash: &Digest) -> Result<Option<Receipt>> {
        self.inner.get_receipt(receipt_hash).await
    }

    async fn get_receipt_by_id(&self, id: &ReceiptId) -> Result<Option<Receipt>> {
        self.inner.get_receipt_by_id(id).await
    }

    async fn get_receipt_by_position(&self, actor_id: &str, seq: u64) -> Result<Option<Receipt>> {
        self.inner.get_receipt_by_position(actor_id, seq).await
    }

    async fn get_receipts_range(&self, actor_id: &str, start: u64, end: u64) -> Result<Vec<Receipt>> {
        self.inner.get_receipts_range(actor_id, start, end).await
    }

    async fn get_chain_head(&self, actor_id: &str) -> Result<Option<ChainHead>> {
        self.inner.get_chain_head(actor_id).await
    }

    async fn list_actors(&self) -> Result<Vec<String>> {
        self.inner.list_actors().await
    }

    async fn insert_commitment(&self, commitment: &CounterfactualCommitment) -> Result<()> {
        self.inner.insert_commitment(commitment).await
    }

    async fn get_commitment(&self, id: &CommitmentId) -> Result<Option<CounterfactualCommitment>> {
        self.inner.get_commitment(id).await
    }

    async fn transition_commitment(
        &self,
        id: &CommitmentId,
        from: CommitmentState,
        to: CommitmentState,
        revealed_receipt_hash: Option<Digest>,
    ) -> Result<bool> {
        if from == CommitmentState::Revealed && self.fail_settling.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidData(format!("commitment {id} is unwritable")));
        }
        self.inner
            .transition_commitment(id, from, to, revealed_receipt_hash)
            .await
    }

    async fn expire_commitments(&self, now: DateTime<Utc>) -> Result<Vec<CommitmentId>> {
        self.inner.expire_commitments(now).await
    }

    async fn save_keys(&self, signer_id: &str, keys: &[PublishedKey]) -> Result<()> {
        self.inner.save_keys(signer_id, keys).await
    }

    async fn load_keys(&self, signer_id: &str) -> Result<Vec<PublishedKey>> {
        self.inner.load_keys(signer_id).await
    }
}
