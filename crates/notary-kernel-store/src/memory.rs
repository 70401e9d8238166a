//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use notary_kernel_core::{
    ChainHead, CommitmentId, CommitmentState, CounterfactualCommitment, Digest, KeyId,
    PublishedKey, Receipt, ReceiptId,
};

use crate::error::{Result, StoreError};
use crate::traits::{check_extends, sort_keys, AppendResult, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock; the
/// write lock makes every append atomic with respect to other writers.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Receipts indexed by lookup hash.
    receipts: HashMap<Digest, Receipt>,

    /// receipt_id -> lookup hash.
    by_id: HashMap<ReceiptId, Digest>,

    /// Position index: (actor_id, seq) -> lookup hash.
    positions: HashMap<(String, u64), Digest>,

    /// Chain heads, sorted by actor.
    heads: BTreeMap<String, ChainHead>,

    commitments: HashMap<CommitmentId, CounterfactualCommitment>,

    /// signer_id -> key records by id.
    keys: HashMap<String, HashMap<KeyId, PublishedKey>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_receipt(
        &self,
        receipt: &Receipt,
        receipt_hash: &Digest,
        expected_head: Option<&ChainHead>,
    ) -> Result<AppendResult> {
        let mut inner = self.write()?;

        let current = inner.heads.get(&receipt.actor_id);
        if current != expected_head {
            debug!(actor = %receipt.actor_id, "append rejected: head moved");
            return Ok(AppendResult::HeadMoved {
                current: current.cloned(),
            });
        }
        check_extends(receipt, expected_head).map_err(StoreError::InvalidData)?;

        if inner.receipts.contains_key(receipt_hash) || inner.by_id.contains_key(&receipt.receipt_id) {
            return Err(StoreError::Duplicate(format!("receipt {}", receipt.receipt_id)));
        }

        let head = match expected_head {
            None => ChainHead {
                actor_id: receipt.actor_id.clone(),
                head_sequence: 1,
                head_hash: *receipt_hash,
            },
            Some(head) => head.advance(*receipt_hash),
        };

        inner.receipts.insert(*receipt_hash, receipt.clone());
        inner.by_id.insert(receipt.receipt_id, *receipt_hash);
        inner
            .positions
            .insert((receipt.actor_id.clone(), receipt.chain_sequence), *receipt_hash);
        inner.heads.insert(receipt.actor_id.clone(), head);

        Ok(AppendResult::Appended)
    }

    async fn get_receipt(&self, receipt_hash: &Digest) -> Result<Option<Receipt>> {
        let inner = self.read()?;
        Ok(inner.receipts.get(receipt_hash).cloned())
    }

    async fn get_receipt_by_id(&self, id: &ReceiptId) -> Result<Option<Receipt>> {
        let inner = self.read()?;
        Ok(inner
            .by_id
            .get(id)
            .and_then(|hash| inner.receipts.get(hash))
            .cloned())
    }

    async fn get_receipt_by_position(&self, actor_id: &str, seq: u64) -> Result<Option<Receipt>> {
        let inner = self.read()?;
        Ok(inner
            .positions
            .get(&(actor_id.to_string(), seq))
            .and_then(|hash| inner.receipts.get(hash))
            .cloned())
    }

    async fn get_receipts_range(&self, actor_id: &str, start: u64, end: u64) -> Result<Vec<Receipt>> {
        let inner = self.read()?;
        let head = match inner.heads.get(actor_id) {
            Some(head) => head.head_sequence,
            None => return Ok(Vec::new()),
        };

        let mut receipts = Vec::new();
        for seq in start.max(1)..=end.min(head) {
            if let Some(receipt) = inner
                .positions
                .get(&(actor_id.to_string(), seq))
                .and_then(|hash| inner.receipts.get(hash))
            {
                receipts.push(receipt.clone());
            }
        }
        Ok(receipts)
    }

    async fn get_chain_head(&self, actor_id: &str) -> Result<Option<ChainHead>> {
        let inner = self.read()?;
        Ok(inner.heads.get(actor_id).cloned())
    }

    async fn list_actors(&self) -> Result<Vec<String>> {
        let inner = self.read()?;
        Ok(inner.heads.keys().cloned().collect())
    }

    async fn insert_commitment(&self, commitment: &CounterfactualCommitment) -> Result<()> {
        let mut inner = self.write()?;
        if inner.commitments.contains_key(&commitment.commitment_id) {
            return Err(StoreError::Duplicate(format!(
                "commitment {}",
                commitment.commitment_id
            )));
        }
        inner
            .commitments
            .insert(commitment.commitment_id, commitment.clone());
        Ok(())
    }

    async fn get_commitment(&self, id: &CommitmentId) -> Result<Option<CounterfactualCommitment>> {
        let inner = self.read()?;
        Ok(inner.commitments.get(id).cloned())
    }

    async fn transition_commitment(
        &self,
        id: &CommitmentId,
        from: CommitmentState,
        to: CommitmentState,
        revealed_receipt_hash: Option<Digest>,
    ) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.commitments.get_mut(id) {
            Some(commitment) if commitment.state == from => {
                commitment.state = to;
                commitment.revealed_receipt_hash = revealed_receipt_hash;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("commitment {id}"))),
        }
    }

    async fn expire_commitments(&self, now: DateTime<Utc>) -> Result<Vec<CommitmentId>> {
        let mut inner = self.write()?;
        let mut expired = Vec::new();
        for commitment in inner.commitments.values_mut() {
            if commitment.state == CommitmentState::Committed && commitment.reveal_deadline < now {
                commitment.state = CommitmentState::Expired;
                expired.push(commitment.commitment_id);
            }
        }
        expired.sort();
        Ok(expired)
    }

    async fn save_keys(&self, signer_id: &str, keys: &[PublishedKey]) -> Result<()> {
        let mut inner = self.write()?;
        let records = inner.keys.entry(signer_id.to_string()).or_default();
        for key in keys {
            records.insert(key.key_id.clone(), key.clone());
        }
        Ok(())
    }

    async fn load_keys(&self, signer_id: &str) -> Result<Vec<PublishedKey>> {
        let inner = self.read()?;
        let mut keys: Vec<PublishedKey> = inner
            .keys
            .get(signer_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default();
        sort_keys(&mut keys);
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{commitment, published_keys, signed_chain};
    use chrono::Duration;

    #[tokio::test]
    async fn test_append_advances_head() {
        let store = MemoryStore::new();
        let chain = signed_chain("agent-1", 3);

        let mut head: Option<ChainHead> = None;
        for (receipt, hash) in &chain {
            let result = store.append_receipt(receipt, hash, head.as_ref()).await.unwrap();
            assert_eq!(result, AppendResult::Appended);
            head = store.get_chain_head("agent-1").await.unwrap();
        }

        let head = head.unwrap();
        assert_eq!(head.head_sequence, 3);
        assert_eq!(head.head_hash, chain[2].1);
        assert_eq!(store.list_actors().await.unwrap(), vec!["agent-1".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_head_rejected() {
        let store = MemoryStore::new();
        let chain = signed_chain("agent-1", 2);
        store.append_receipt(&chain[0].0, &chain[0].1, None).await.unwrap();

        // second genesis for the same actor
        let result = store.append_receipt(&chain[0].0, &chain[0].1, None).await.unwrap();
        match result {
            AppendResult::HeadMoved { current } => {
                assert_eq!(current.unwrap().head_sequence, 1);
            }
            other => panic!("expected HeadMoved, got {:?}", other),
        }
        assert!(store.get_receipt_by_position("agent-1", 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookups() {
        let store = MemoryStore::new();
        let chain = signed_chain("agent-1", 3);
        let mut head = None;
        for (receipt, hash) in &chain {
            store.append_receipt(receipt, hash, head.as_ref()).await.unwrap();
            head = store.get_chain_head("agent-1").await.unwrap();
        }

        let (r2, h2) = &chain[1];
        assert_eq!(store.get_receipt(h2).await.unwrap().as_ref(), Some(r2));
        assert_eq!(store.get_receipt_by_id(&r2.receipt_id).await.unwrap().as_ref(), Some(r2));
        assert_eq!(store.get_receipt_by_position("agent-1", 2).await.unwrap().as_ref(), Some(r2));

        let range = store.get_receipts_range("agent-1", 2, 10).await.unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].chain_sequence, 2);
        assert!(store.get_receipts_range("nobody", 1, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commitment_cas() {
        let store = MemoryStore::new();
        let c = commitment(Duration::minutes(10));
        store.insert_commitment(&c).await.unwrap();
        assert!(store.insert_commitment(&c).await.is_err());

        let hash = Digest::hash(b"receipt");
        assert!(store
            .transition_commitment(&c.commitment_id, CommitmentState::Committed, CommitmentState::Revealed, Some(hash))
            .await
            .unwrap());
        // second reveal loses
        assert!(!store
            .transition_commitment(&c.commitment_id, CommitmentState::Committed, CommitmentState::Revealed, Some(hash))
            .await
            .unwrap());

        let stored = store.get_commitment(&c.commitment_id).await.unwrap().unwrap();
        assert_eq!(stored.state, CommitmentState::Revealed);
        assert_eq!(stored.revealed_receipt_hash, Some(hash));
    }

    #[tokio::test]
    async fn test_expire_only_committed_past_deadline() {
        let store = MemoryStore::new();
        let late = commitment(Duration::minutes(-1));
        let fresh = commitment(Duration::minutes(10));
        store.insert_commitment(&late).await.unwrap();
        store.insert_commitment(&fresh).await.unwrap();

        let expired = store.expire_commitments(Utc::now()).await.unwrap();
        assert_eq!(expired, vec![late.commitment_id]);
        assert!(store.expire_commitments(Utc::now()).await.unwrap().is_empty());

        let fresh = store.get_commitment(&fresh.commitment_id).await.unwrap().unwrap();
        assert_eq!(fresh.state, CommitmentState::Committed);
    }

    #[tokio::test]
    async fn test_key_records_by_signer() {
        let store = MemoryStore::new();
        let keys = published_keys();
        // Saved newest first, loaded oldest first.
        store.save_keys("notary", &[keys[1].clone()]).await.unwrap();
        store.save_keys("notary", &[keys[0].clone()]).await.unwrap();

        assert_eq!(store.load_keys("notary").await.unwrap(), keys);
        assert!(store.load_keys("other").await.unwrap().is_empty());
    }
}
